use std::sync::Arc;

use crate::devices::Fleet;
use crate::hub::BroadcastHub;
use crate::recorder::SessionRecorder;
use crate::store::RecordStore;

/// Everything the control plane can reach, wired once in `main`
pub struct AppState {
    pub store: Arc<RecordStore>,
    pub hub: Arc<BroadcastHub>,
    pub fleet: Arc<Fleet>,
    pub recorder: Arc<SessionRecorder>,
}
