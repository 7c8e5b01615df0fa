//! Ctrl-C handling

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Install a Ctrl-C handler and return the flag it sets
pub fn install_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })?;
    Ok(flag)
}
