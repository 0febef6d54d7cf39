use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::warn;

use crate::{Client, ClientStatus, ProcessorId};

static ATTACHED: Lazy<Mutex<Option<Client>>> = Lazy::new(|| Mutex::new(None));

/// Expose `client` to the control surfaces, replacing any attached client.
pub fn attach(client: &Client) {
    ATTACHED.lock().replace(client.clone());
}

/// Stop exposing the attached client.
pub fn detach() {
    ATTACHED.lock().take();
}

fn attached() -> Option<Client> {
    ATTACHED.lock().clone()
}

/// Fetch the status snapshot of the attached client, if any.
pub fn get_status() -> Option<ClientStatus> {
    attached().map(|client| client.status())
}

/// Activate or deactivate a registration of the attached client. Returns
/// `false` if no client is attached or the client refused the change.
pub fn set_active(processor: ProcessorId, active: bool) -> bool {
    let Some(client) = attached() else {
        return false;
    };
    let result = if active {
        client.activate_processor(processor)
    } else {
        client.deactivate_processor(processor)
    };
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!(%processor, active, "control request refused: {err}");
            false
        }
    }
}
