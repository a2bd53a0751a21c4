//! Idempotent single-container lifecycle calls.
//!
//! Gateways answer "already in that state" with 304, 409 or a dropped connection depending on
//! version and proxy. These helpers consult inspect before treating any of those as failure.

use tracing::debug;

use crate::error::GatewayError;
use crate::gateway::{ContainerGateway, GatewayResult};
use crate::types::ContainerState;

async fn live_state(gateway: &dyn ContainerGateway, id: &str) -> Option<ContainerState> {
    match gateway.inspect(id).await {
        Ok(inspect) => Some(ContainerState::parse(&inspect.state.status)),
        Err(e) => {
            debug!("Could not verify state of {}: {}", id, e);
            None
        }
    }
}

/// Stop; ambiguous answers succeed and leave confirmation to the caller's polling
pub async fn stop_container(gateway: &dyn ContainerGateway, id: &str) -> GatewayResult<()> {
    match gateway.stop(id).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_idempotent_condition() => {
            match live_state(gateway, id).await {
                Some(state) if state.is_stopped() => debug!("{} already stopped ({})", id, e),
                Some(state) => debug!("Stop of {} answered '{}' while {}", id, e, state),
                None => {}
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Start; an ambiguous answer succeeds only if inspect shows the container up
pub async fn start_container(gateway: &dyn ContainerGateway, id: &str) -> GatewayResult<()> {
    match gateway.start(id).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_idempotent_condition() => match live_state(gateway, id).await {
            Some(ContainerState::Running | ContainerState::Restarting) => {
                debug!("{} already running ({})", id, e);
                Ok(())
            }
            _ => Err(e),
        },
        Err(e) => Err(e),
    }
}

/// Remove (forced); a container that is already gone counts as removed
pub async fn remove_container(gateway: &dyn ContainerGateway, id: &str) -> GatewayResult<()> {
    match gateway.remove(id).await {
        Ok(()) | Err(GatewayError::NotFound { .. }) | Err(GatewayError::NotModified) => Ok(()),
        Err(e @ GatewayError::Transport { .. }) => match gateway.inspect(id).await {
            Err(GatewayError::NotFound { .. }) => Ok(()),
            _ => Err(e),
        },
        Err(e) => Err(e),
    }
}

pub async fn restart_container(gateway: &dyn ContainerGateway, id: &str) -> GatewayResult<()> {
    match gateway.restart(id).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_idempotent_condition() => match live_state(gateway, id).await {
            Some(ContainerState::Running | ContainerState::Restarting) => Ok(()),
            _ => Err(e),
        },
        Err(e) => Err(e),
    }
}
