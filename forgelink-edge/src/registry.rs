use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

const OBJECT_ID_NODE: u32 = 0;

pub type DeviceId = u32;

/// Allocates stable, non-colliding numeric ids for devices. The id
/// forms the upper word of every alias the device births, keeping
/// alias spaces disjoint between identities.
pub struct Registry {
    device_ids: HashMap<DeviceId, Arc<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            device_ids: HashMap::new(),
        }
    }

    pub fn generate_device_id(&mut self, name: Arc<String>) -> DeviceId {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        let mut id = hasher.finish() as DeviceId;
        while id == OBJECT_ID_NODE || self.device_ids.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.device_ids.insert(id, name);
        id
    }

    pub fn remove_device(&mut self, id: DeviceId) {
        self.device_ids.remove(&id);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
