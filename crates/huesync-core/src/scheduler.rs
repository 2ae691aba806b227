// ── Scheduled tasks ──
//
// Single-flight timers keyed by token. The scheduler only does the
// bookkeeping: arming produces a `TimerCommand` for the driver to act on,
// and a fired ticket is honored only if its generation is still current,
// so a re-armed or cancelled timer that fires late is ignored.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// One armed timer instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTicket<T> {
    pub token: T,
    pub generation: u64,
    pub delay: Duration,
}

/// Instruction for whatever actually sleeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerCommand<T> {
    Arm(TimerTicket<T>),
    Disarm(T),
}

#[derive(Debug)]
pub struct Scheduler<T> {
    armed: HashMap<T, u64>,
    generation: u64,
    commands: Vec<TimerCommand<T>>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            armed: HashMap::new(),
            generation: 0,
            commands: Vec::new(),
        }
    }
}

impl<T: Clone + Eq + Hash> Scheduler<T> {
    /// Arm `token`, replacing any timer already armed for it.
    pub fn schedule(&mut self, token: T, delay: Duration) {
        self.generation += 1;
        self.armed.insert(token.clone(), self.generation);
        self.commands.push(TimerCommand::Arm(TimerTicket {
            token,
            generation: self.generation,
            delay,
        }));
    }

    /// Arm `token` only if it is not already armed. Returns `true` if armed now.
    pub fn schedule_if_idle(&mut self, token: T, delay: Duration) -> bool {
        if self.armed.contains_key(&token) {
            return false;
        }
        self.schedule(token, delay);
        true
    }

    pub fn cancel(&mut self, token: &T) -> bool {
        if self.armed.remove(token).is_some() {
            self.commands.push(TimerCommand::Disarm(token.clone()));
            true
        } else {
            false
        }
    }

    pub fn cancel_where(&mut self, mut pred: impl FnMut(&T) -> bool) {
        let doomed: Vec<T> = self.armed.keys().filter(|t| pred(t)).cloned().collect();
        for token in doomed {
            self.cancel(&token);
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel_where(|_| true);
    }

    pub fn is_armed(&self, token: &T) -> bool {
        self.armed.contains_key(token)
    }

    /// Consume a fired ticket. `false` means it was superseded or cancelled.
    pub fn fire(&mut self, ticket: &TimerTicket<T>) -> bool {
        if self.armed.get(&ticket.token) == Some(&ticket.generation) {
            self.armed.remove(&ticket.token);
            true
        } else {
            false
        }
    }

    pub fn drain_commands(&mut self) -> Vec<TimerCommand<T>> {
        std::mem::take(&mut self.commands)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn armed_ticket(commands: &[TimerCommand<&'static str>]) -> TimerTicket<&'static str> {
        match commands.last().unwrap() {
            TimerCommand::Arm(t) => t.clone(),
            TimerCommand::Disarm(_) => panic!("expected arm"),
        }
    }

    #[test]
    fn rescheduling_replaces_previous_timer() {
        let mut s = Scheduler::default();
        s.schedule("window", Duration::from_millis(1200));
        let first = armed_ticket(&s.drain_commands());
        s.schedule("window", Duration::from_millis(1200));
        let second = armed_ticket(&s.drain_commands());

        assert!(!s.fire(&first), "stale ticket must not fire");
        assert!(s.fire(&second));
        assert!(!s.fire(&second), "tickets fire once");
    }

    #[test]
    fn schedule_if_idle_coalesces() {
        let mut s = Scheduler::default();
        assert!(s.schedule_if_idle("resync", Duration::from_secs(1)));
        assert!(!s.schedule_if_idle("resync", Duration::from_secs(1)));
        assert_eq!(s.drain_commands().len(), 1);
    }

    #[test]
    fn cancel_disarms() {
        let mut s = Scheduler::default();
        s.schedule("a", Duration::ZERO);
        s.schedule("b", Duration::ZERO);
        let ticket = match &s.drain_commands()[0] {
            TimerCommand::Arm(t) => t.clone(),
            TimerCommand::Disarm(_) => unreachable!(),
        };
        s.cancel_all();
        assert!(!s.is_armed(&"a"));
        assert!(!s.fire(&ticket));
        assert_eq!(s.drain_commands().len(), 2);
    }
}
