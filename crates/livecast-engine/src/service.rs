//! Process-wide broadcast service.
//!
//! The host registers its controller once at startup and removes it on
//! exit. Anything else in the process reaches the running session through
//! [`get`].

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::controller::SessionController;
use crate::error::EngineError;
use crate::EngineResult;

static SERVICE: RwLock<Option<SessionController>> = parking_lot::const_rwlock(None);

/// Register the controller for the lifetime of the process.
pub fn init(controller: SessionController) -> EngineResult<()> {
    let mut service = SERVICE.write();
    if service.is_some() {
        return Err(EngineError::AlreadyInitialized);
    }
    *service = Some(controller);
    info!("Broadcast service initialized");
    Ok(())
}

/// The registered controller, if the service is running.
pub fn get() -> Option<SessionController> {
    SERVICE.read().clone()
}

pub fn is_initialized() -> bool {
    SERVICE.read().is_some()
}

/// Deregister the controller.
///
/// The session itself is stopped by whoever owns the controller, usually the
/// [`Engine`](crate::Engine) on its shutdown command.
pub fn shutdown() -> Option<SessionController> {
    let controller = SERVICE.write().take();
    match controller {
        Some(_) => info!("Broadcast service shut down"),
        None => debug!("Broadcast service not running"),
    }
    controller
}
