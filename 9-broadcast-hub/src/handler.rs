use std::sync::Arc;

use tracing::debug;

use crate::{
    connection::{Connection, Inbound},
    hub::{HubError, HubHandle},
    message::Message,
};

/// Bridges one connection to the hub until its read side fails.
///
/// The read failure is the only way a participant leaves: the connection is
/// deregistered and everyone still present receives an advisory carrying
/// the error text.
pub async fn serve_connection<I>(
    connection: Arc<dyn Connection>,
    mut inbound: I,
    hub: HubHandle,
) -> Result<(), HubError>
where
    I: Inbound,
{
    let id = connection.id().clone();
    hub.register(connection.clone()).await?;

    loop {
        match inbound.receive().await {
            Ok(message) => hub.publish(message).await?,
            Err(error) => {
                debug!(connection = %id, %error, "read failed, leaving hub");
                hub.deregister(connection).await?;
                hub.publish(Message::advisory(&error)).await?;
                return Ok(());
            }
        }
    }
}
