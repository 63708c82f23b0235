mod common;

use std::time::Duration;

use anyhow::Result;
use broadcast_hub::{
    connection::{ConnectionId, TransportError},
    hub::{FailurePolicy, HubConfig, spawn_hub},
    message::Message,
};
use common::{Recorder, ids};
use tokio::time::timeout;

fn retaining() -> HubConfig {
    HubConfig {
        failure_policy: FailurePolicy::Retain,
        ..HubConfig::default()
    }
}

#[tokio::test]
async fn publish_reaches_exactly_the_current_members() -> Result<()> {
    let (hub, _task) = spawn_hub(HubConfig::default());
    let peers: Vec<_> = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(Recorder::healthy)
        .collect();
    for peer in &peers {
        hub.register(peer.clone()).await?;
    }

    hub.publish(Message::new(None, "before")).await?;
    hub.deregister(peers[1].clone()).await?;
    hub.deregister(peers[3].clone()).await?;
    let report = hub.broadcast(Message::new(None, "after")).await?;

    assert_eq!(report.delivered.len(), 3);
    for peer in [&peers[0], &peers[2], &peers[4]] {
        assert_eq!(peer.texts(), vec!["before", "after"]);
    }
    for peer in [&peers[1], &peers[3]] {
        assert_eq!(peer.texts(), vec!["before"]);
    }
    assert_eq!(hub.members().await?, ids(&["a", "c", "e"]));
    Ok(())
}

#[tokio::test]
async fn late_registration_sees_only_later_messages() -> Result<()> {
    let (hub, _task) = spawn_hub(HubConfig::default());
    let early = Recorder::healthy("early");
    let late = Recorder::healthy("late");

    hub.register(early.clone()).await?;
    hub.publish(Message::new(None, "one")).await?;
    hub.register(late.clone()).await?;
    hub.broadcast(Message::new(None, "two")).await?;

    assert_eq!(early.texts(), vec!["one", "two"]);
    assert_eq!(late.texts(), vec!["two"]);
    Ok(())
}

#[tokio::test]
async fn failing_recipient_does_not_stop_fan_out() -> Result<()> {
    let (hub, _task) = spawn_hub(retaining());
    let healthy = [
        Recorder::healthy("h1"),
        Recorder::healthy("h2"),
        Recorder::healthy("h3"),
    ];
    let broken = Recorder::failing("broken");

    hub.register(healthy[0].clone()).await?;
    hub.register(broken.clone()).await?;
    hub.register(healthy[1].clone()).await?;
    hub.register(healthy[2].clone()).await?;

    let report = hub.broadcast(Message::new(None, "hello")).await?;

    assert_eq!(report.attempted(), 4);
    assert_eq!(report.delivered.len(), 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].connection, ConnectionId::from("broken"));
    assert!(matches!(report.failures[0].error, TransportError::Closed));
    for peer in &healthy {
        assert_eq!(peer.texts(), vec!["hello"]);
    }

    // Retain leaves the broken member in place.
    assert_eq!(hub.members().await?, ids(&["broken", "h1", "h2", "h3"]));
    assert!(!broken.is_closed());
    Ok(())
}

#[tokio::test]
async fn evict_policy_removes_and_closes_failed_recipient() -> Result<()> {
    let (hub, _task) = spawn_hub(HubConfig::default());
    let healthy = Recorder::healthy("healthy");
    let broken = Recorder::failing("broken");
    hub.register(healthy.clone()).await?;
    hub.register(broken.clone()).await?;

    let first = hub.broadcast(Message::new(None, "one")).await?;
    let second = hub.broadcast(Message::new(None, "two")).await?;

    assert_eq!(first.failures.len(), 1);
    assert!(second.is_complete());
    assert_eq!(second.attempted(), 1);
    assert!(broken.is_closed());
    assert_eq!(hub.members().await?, ids(&["healthy"]));
    assert_eq!(healthy.texts(), vec!["one", "two"]);
    Ok(())
}

#[tokio::test]
async fn stalled_recipient_is_bounded_by_send_timeout() -> Result<()> {
    let config = HubConfig {
        send_timeout: Some(Duration::from_millis(50)),
        failure_policy: FailurePolicy::Retain,
        ..HubConfig::default()
    };
    let (hub, _task) = spawn_hub(config);
    let healthy = Recorder::healthy("healthy");
    hub.register(Recorder::stalled("stalled")).await?;
    hub.register(healthy.clone()).await?;

    let report = timeout(
        Duration::from_secs(2),
        hub.broadcast(Message::new(None, "tick")),
    )
    .await??;

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0].error,
        TransportError::TimedOut(limit) if limit == Duration::from_millis(50)
    ));
    assert_eq!(healthy.texts(), vec!["tick"]);

    // The hub keeps serving after the stalled send gave up.
    assert_eq!(hub.members().await?, ids(&["healthy", "stalled"]));
    Ok(())
}

#[tokio::test]
async fn repeated_registration_delivers_once() -> Result<()> {
    let (hub, _task) = spawn_hub(HubConfig::default());
    let peer = Recorder::healthy("peer");

    hub.register(peer.clone()).await?;
    hub.register(peer.clone()).await?;
    hub.deregister(Recorder::healthy("ghost")).await?;
    let report = hub.broadcast(Message::new(None, "once")).await?;

    assert_eq!(report.delivered, ids(&["peer"]));
    assert_eq!(peer.texts(), vec!["once"]);
    Ok(())
}

#[tokio::test]
async fn stale_deregistration_keeps_the_replacement() -> Result<()> {
    let (hub, _task) = spawn_hub(HubConfig::default());
    let old = Recorder::healthy("peer");
    let new = Recorder::healthy("peer");

    hub.register(old.clone()).await?;
    hub.register(new.clone()).await?;
    // The handler of the replaced connection leaves after the replacement joined.
    hub.deregister(old.clone()).await?;

    assert_eq!(hub.members().await?, ids(&["peer"]));
    let report = hub.broadcast(Message::new(None, "still routed")).await?;
    assert_eq!(report.delivered, ids(&["peer"]));
    assert_eq!(new.texts(), vec!["still routed"]);
    assert!(old.texts().is_empty());

    hub.deregister(new.clone()).await?;
    assert!(hub.members().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn double_deregistration_is_harmless() -> Result<()> {
    let (hub, _task) = spawn_hub(HubConfig::default());
    let stays = Recorder::healthy("stays");
    let leaves = Recorder::healthy("leaves");
    hub.register(stays.clone()).await?;
    hub.register(leaves.clone()).await?;

    hub.deregister(leaves.clone()).await?;
    hub.deregister(leaves.clone()).await?;
    hub.broadcast(Message::new(None, "still here")).await?;

    assert_eq!(stays.texts(), vec!["still here"]);
    assert!(leaves.texts().is_empty());
    Ok(())
}

#[tokio::test]
async fn shutdown_notifies_and_closes_everyone() -> Result<()> {
    let (hub, task) = spawn_hub(HubConfig::default());
    let peers = [Recorder::healthy("a"), Recorder::healthy("b")];
    for peer in &peers {
        hub.register(peer.clone()).await?;
    }

    hub.shutdown().await?;
    task.await?;

    for peer in &peers {
        assert_eq!(peer.texts(), vec!["server shutting down"]);
        assert!(peer.is_closed());
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_publishers_keep_per_sender_order() -> Result<()> {
    let (hub, _task) = spawn_hub(HubConfig::default());
    let observer = Recorder::healthy("observer");
    hub.register(observer.clone()).await?;

    let mut senders = Vec::new();
    for sender in ["x", "y"] {
        let hub = hub.clone();
        senders.push(tokio::spawn(async move {
            for n in 0..20 {
                hub.publish(Message::new(Some(sender.into()), format!("{sender}{n}")))
                    .await?;
            }
            anyhow::Ok(())
        }));
    }
    for sender in senders {
        sender.await??;
    }
    hub.members().await?;

    let texts = observer.texts();
    assert_eq!(texts.len(), 40);
    for sender in ["x", "y"] {
        let from_sender: Vec<_> = texts.iter().filter(|t| t.starts_with(sender)).collect();
        let expected: Vec<_> = (0..20).map(|n| format!("{sender}{n}")).collect();
        assert_eq!(from_sender, expected.iter().collect::<Vec<_>>());
    }
    Ok(())
}
