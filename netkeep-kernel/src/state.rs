use parking_lot::Mutex;
use std::sync::Arc;

/// État partagé entre tâches (hosts, sessions terminal).
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
