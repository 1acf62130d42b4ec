use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::common::error::AppError;

type Key = (String, IpAddr);

struct Entry {
    attempts: Vec<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

/// Per-(email, ip) sliding-window login lockout. In-process only: state is
/// lost on restart and not shared across instances, which is fine for a
/// single-node deployment and acceptable noise for a multi-node one.
pub struct LoginLimiter {
    state: Mutex<HashMap<Key, Entry>>,
    window: Duration,
    max_attempts: u32,
    lock_duration: Duration,
}

impl LoginLimiter {
    pub fn new(window_seconds: i64, max_attempts: u32, lock_seconds: i64) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            window: Duration::seconds(window_seconds),
            max_attempts,
            lock_duration: Duration::seconds(lock_seconds),
        }
    }

    fn key(email: &str, ip: IpAddr) -> Key {
        (email.trim().to_lowercase(), ip)
    }

    /// Call before attempting a login. Errors if the (email, ip) pair is
    /// currently locked out.
    pub fn check(&self, email: &str, ip: IpAddr) -> Result<(), AppError> {
        let key = Self::key(email, ip);
        let state = self.state.lock().unwrap();
        if let Some(entry) = state.get(&key) {
            if let Some(locked_until) = entry.locked_until {
                if Utc::now() < locked_until {
                    return Err(AppError::RateLimited);
                }
            }
        }
        Ok(())
    }

    /// Records a failed attempt; locks the pair out once `max_attempts`
    /// failures land inside the sliding window.
    pub fn record_failure(&self, email: &str, ip: IpAddr) {
        let key = Self::key(email, ip);
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(key).or_insert_with(|| Entry { attempts: Vec::new(), locked_until: None });

        entry.attempts.retain(|t| now - *t <= self.window);
        entry.attempts.push(now);

        if entry.attempts.len() as u32 >= self.max_attempts {
            entry.locked_until = Some(now + self.lock_duration);
        }
    }

    /// Clears attempt history on a successful login.
    pub fn record_success(&self, email: &str, ip: IpAddr) {
        let key = Self::key(email, ip);
        self.state.lock().unwrap().remove(&key);
    }
}
