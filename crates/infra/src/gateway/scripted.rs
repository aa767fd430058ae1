use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use super::{MessagingGateway, OutgoingMessage, SendOutcome};

/// Gateway with per-phone scripted outcomes, for tests and demos.
///
/// Each call pops the next scripted outcome for the phone number; once the
/// script runs out, the fallback (default `Success`) is returned. Every call
/// is recorded.
#[derive(Debug)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<String, VecDeque<SendOutcome>>>,
    sent: Mutex<Vec<OutgoingMessage>>,
    fallback: SendOutcome,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::with_fallback(SendOutcome::Success)
    }

    pub fn with_fallback(fallback: SendOutcome) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            fallback,
        }
    }

    /// Queue outcomes for `phone`, consumed in order.
    pub fn script(&self, phone: impl Into<String>, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(phone.into())
            .or_default()
            .extend(outcomes);
    }

    /// Every message passed to `send`, in call order.
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_to(&self, phone: &str) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.phone == phone)
            .count()
    }
}

impl MessagingGateway for ScriptedGateway {
    fn send(&self, message: &OutgoingMessage) -> SendOutcome {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());

        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&message.phone)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.clone())
    }
}
