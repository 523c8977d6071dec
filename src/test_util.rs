use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Polls `condition` until it holds or `timeout` elapses, returning the condition's final value
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Collects the target state of every state transition that is logged while the returned
///  subscriber is the current thread's default
pub fn state_log() -> (impl Subscriber + Send + Sync, Arc<Mutex<Vec<String>>>) {
    let states: Arc<Mutex<Vec<String>>> = Default::default();
    let subscriber = tracing_subscriber::registry().with(StateLog { states: states.clone() });
    (subscriber, states)
}

struct StateLog {
    states: Arc<Mutex<Vec<String>>>,
}

impl <S: Subscriber> Layer<S> for StateLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = TargetState(None);
        event.record(&mut visitor);
        if let Some(state) = visitor.0 {
            self.states.lock().push(state);
        }
    }
}

struct TargetState(Option<String>);

impl Visit for TargetState {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "to" {
            self.0 = Some(format!("{:?}", value));
        }
    }
}
