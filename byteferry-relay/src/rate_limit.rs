use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

// Sliding-window admission counter per peer address. Timestamps older than
// the window are pruned on access, so the deque always reflects the last
// `window` of admissions for that address.
pub struct RateLimiter {
    window: Duration,
    max_admissions: usize,
    admissions: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_admissions: usize) -> Self {
        Self {
            window,
            max_admissions,
            admissions: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_admit(&self, peer_ip: IpAddr) -> bool {
        self.try_admit_at(peer_ip, Instant::now())
    }

    fn try_admit_at(&self, peer_ip: IpAddr, now: Instant) -> bool {
        let mut admissions = self.admissions.lock();
        let recent = admissions.entry(peer_ip).or_default();
        while recent
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            recent.pop_front();
        }
        if recent.len() >= self.max_admissions {
            return false;
        }
        recent.push_back(now);
        true
    }
}
