use std::sync::Mutex;

use chrono::Utc;
use rand::Rng;

use crate::constants::{CHAT_ID_SEPARATOR, PUSH_ID_CHARS};

/// Deterministic chat id for a pair of users.
///
/// Both ids are sorted before joining, so either participant computes the
/// same id without a lookup.
pub fn chat_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}{}{}", first, CHAT_ID_SEPARATOR, second)
}

/// Generates 20-character keys that sort in creation order.
///
/// The first 8 characters encode the millisecond timestamp, the remaining 12
/// are random. Keys generated within the same millisecond increment the
/// random part so ordering still follows creation.
#[derive(Debug, Default)]
pub struct PushIdGenerator {
    state: Mutex<PushIdState>,
}

#[derive(Debug, Default)]
struct PushIdState {
    last_time: i64,
    last_random: [u8; 12],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        self.next_id_at(Utc::now().timestamp_millis())
    }

    pub fn next_id_at(&self, now_millis: i64) -> String {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Never step back in time, even if the wall clock does
        let now = now_millis.max(state.last_time);

        if now == state.last_time && state.last_time != 0 {
            // Increment the random part, carrying into the previous digit
            for digit in state.last_random.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::rng();
            for digit in state.last_random.iter_mut() {
                *digit = rng.random_range(0..64);
            }
        }
        state.last_time = now;

        let mut id = String::with_capacity(20);
        let mut time_chars = [0u8; 8];
        let mut remaining = now;
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_ID_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }
        id.extend(time_chars.iter().map(|&c| c as char));
        id.extend(
            state
                .last_random
                .iter()
                .map(|&d| PUSH_ID_CHARS[d as usize] as char),
        );
        id
    }
}
