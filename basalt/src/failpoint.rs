//! Failpoints: named cut points that tests arm to sever a code path and
//! stage crash scenarios.
//!
//! The armed set is process-wide. The `BASALT_FAILPOINTS` environment
//! variable (comma-separated names) seeds it the first time any failpoint
//! is touched, so external harnesses can arm points without code changes.
//! Because the set is global, tests that arm points must not run
//! concurrently with tests that pass through the same cut points.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use crate::error::{EngineError, EngineResult};

static ARMED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn armed() -> &'static Mutex<HashSet<String>> {
    ARMED.get_or_init(|| {
        let mut seeded = HashSet::new();
        if let Ok(raw) = std::env::var("BASALT_FAILPOINTS") {
            for name in raw.split(',') {
                let name = name.trim();
                if !name.is_empty() {
                    seeded.insert(name.to_string());
                }
            }
        }
        Mutex::new(seeded)
    })
}

/// Arms a cut point; every [`check`] on it fails until it is disarmed.
pub fn arm(name: &str) {
    armed().lock().unwrap().insert(name.to_string());
}

pub fn disarm(name: &str) {
    armed().lock().unwrap().remove(name);
}

/// Disarms everything, including points seeded from the environment.
pub fn disarm_all() {
    armed().lock().unwrap().clear();
}

pub fn is_armed(name: &str) -> bool {
    armed().lock().unwrap().contains(name)
}

/// Fails when `name` is armed.
pub fn check(name: &str) -> EngineResult<()> {
    if is_armed(name) {
        return Err(EngineError::Io(std::io::Error::other(format!(
            "failpoint '{name}' tripped"
        ))));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn arming_and_disarming() {
        disarm_all();
        assert!(check("demo.point").is_ok());

        arm("demo.point");
        assert!(is_armed("demo.point"));
        assert!(check("demo.point").is_err());
        // Other points are unaffected.
        assert!(check("demo.other").is_ok());

        disarm("demo.point");
        assert!(check("demo.point").is_ok());
    }
}
