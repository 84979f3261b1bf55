//! Ordered output manager (§4.7).
//!
//! Reconciles parallel step completion with declaration-order, serialized
//! user-visible emission. This is the only component allowed to call the
//! step-event callback (the UI collaborator boundary, §6); the
//! scheduler and action executor never call it directly.
//!
//! Per-step state mirrors §3 exactly: `{started, completed, shown-start,
//! shown-completion, output buffer}`. `try_advance` is the single place that
//! decides what becomes visible, and is re-run after every state change.

use std::sync::Mutex;
use std::time::Duration;

use tr_types::TerminalStatus;

/// The UI collaborator boundary (§6).
pub trait StepEventCallback: Send + Sync {
    fn on_step_start(&self, step_name: &str);
    fn on_step_complete(&self, step_name: &str, status: TerminalStatus, message: &str, duration: Duration);
    fn on_step_output(&self, step_name: &str, line: &str);
    fn on_step_error(&self, step_name: &str, error: &str);
}

struct StepState {
    name: String,
    started: bool,
    completed: bool,
    shown_start: bool,
    shown_completion: bool,
    buffer: Vec<String>,
    pending_complete: Option<(TerminalStatus, String, Duration)>,
}

struct Inner {
    steps: Vec<StepState>,
    next_to_show: usize,
}

/// Serializes concurrent step events into declaration order.
pub struct OrderedOutputManager<C: StepEventCallback> {
    inner: Mutex<Inner>,
    callback: C,
    verbose: bool,
}

impl<C: StepEventCallback> OrderedOutputManager<C> {
    /// `names` must be in declaration order (§4.7's "textual order of
    /// steps inside a stage").
    pub fn new(names: Vec<String>, callback: C, verbose: bool) -> Self {
        let steps = names
            .into_iter()
            .map(|name| StepState {
                name,
                started: false,
                completed: false,
                shown_start: false,
                shown_completion: false,
                buffer: Vec::new(),
                pending_complete: None,
            })
            .collect();
        Self { inner: Mutex::new(Inner { steps, next_to_show: 0 }), callback, verbose }
    }

    /// Record that a step has begun executing (or, for a dependency-skip/
    /// condition-skip result, begun-and-immediately-finished).
    pub fn on_start(&self, idx: usize) {
        let mut inner = self.inner.lock().expect("output manager mutex poisoned");
        inner.steps[idx].started = true;
        self.advance(&mut inner);
    }

    /// Record one output line produced by step `idx`. Buffered if `idx` is
    /// not the currently active step; discarded if `idx` already completed
    /// and its completion was shown (contract 4).
    pub fn on_output(&self, idx: usize, line: String) {
        if !self.verbose {
            return;
        }
        let mut inner = self.inner.lock().expect("output manager mutex poisoned");
        if inner.steps[idx].shown_completion {
            return;
        }
        let is_active = inner.next_to_show == idx && inner.steps[idx].shown_start;
        if is_active {
            self.callback.on_step_output(&inner.steps[idx].name, &line);
        } else {
            inner.steps[idx].buffer.push(line);
        }
    }

    /// Record that a step finished, with its terminal result.
    pub fn on_complete(&self, idx: usize, status: TerminalStatus, message: String, duration: Duration) {
        let mut inner = self.inner.lock().expect("output manager mutex poisoned");
        inner.steps[idx].started = true;
        inner.steps[idx].completed = true;
        inner.steps[idx].pending_complete = Some((status, message, duration));
        self.advance(&mut inner);
    }

    /// Report an error directly (distinct from a terminal ERROR result;
    /// used for infrastructure failures surfaced mid-step).
    pub fn on_error(&self, idx: usize, error: &str) {
        let inner = self.inner.lock().expect("output manager mutex poisoned");
        // Error events are shown immediately regardless of ordering; they
        // supplement, never replace, the ordered completion message.
        let name = inner.steps[idx].name.clone();
        drop(inner);
        self.callback.on_step_error(&name, error);
    }

    fn advance(&self, inner: &mut Inner) {
        loop {
            let idx = inner.next_to_show;
            if idx >= inner.steps.len() {
                return;
            }
            if !inner.steps[idx].started {
                return;
            }
            if !inner.steps[idx].shown_start {
                inner.steps[idx].shown_start = true;
                let name = inner.steps[idx].name.clone();
                self.callback.on_step_start(&name);
                if self.verbose {
                    let buffered: Vec<String> = std::mem::take(&mut inner.steps[idx].buffer);
                    for line in buffered {
                        self.callback.on_step_output(&name, &line);
                    }
                }
            }
            if !inner.steps[idx].completed {
                return;
            }
            let (status, message, duration) = inner.steps[idx].pending_complete.clone().expect("completed implies pending_complete set");
            let name = inner.steps[idx].name.clone();
            self.callback.on_step_complete(&name, status, &message, duration);
            inner.steps[idx].shown_completion = true;
            inner.next_to_show += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<String>>,
    }

    impl StepEventCallback for Recorder {
        fn on_step_start(&self, step_name: &str) {
            self.events.lock().unwrap().push(format!("start({step_name})"));
        }
        fn on_step_complete(&self, step_name: &str, status: TerminalStatus, _message: &str, _duration: Duration) {
            self.events.lock().unwrap().push(format!("complete({step_name},{status:?})"));
        }
        fn on_step_output(&self, step_name: &str, line: &str) {
            self.events.lock().unwrap().push(format!("output({step_name},{line})"));
        }
        fn on_step_error(&self, step_name: &str, error: &str) {
            self.events.lock().unwrap().push(format!("error({step_name},{error})"));
        }
    }

    #[test]
    fn completion_out_of_order_is_shown_in_declaration_order() {
        let recorder = Recorder::default();
        let mgr = OrderedOutputManager::new(vec!["a".into(), "b".into()], recorder, true);

        // b finishes first, but must wait behind a.
        mgr.on_start(1);
        mgr.on_complete(1, TerminalStatus::Ok, "done".into(), Duration::ZERO);
        assert!(mgr.callback.events.lock().unwrap().is_empty());

        mgr.on_start(0);
        mgr.on_complete(0, TerminalStatus::Ok, "done".into(), Duration::ZERO);

        let events = mgr.callback.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "start(a)".to_string(),
                "complete(a,Ok)".to_string(),
                "start(b)".to_string(),
                "complete(b,Ok)".to_string(),
            ]
        );
    }

    #[test]
    fn output_buffered_until_step_is_active() {
        let recorder = Recorder::default();
        let mgr = OrderedOutputManager::new(vec!["a".into(), "b".into()], recorder, true);

        mgr.on_start(1);
        mgr.on_output(1, "early".into());
        assert!(mgr.callback.events.lock().unwrap().is_empty());

        mgr.on_start(0);
        mgr.on_output(0, "hi".into());
        mgr.on_complete(0, TerminalStatus::Ok, "ok".into(), Duration::ZERO);

        let events = mgr.callback.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "start(a)".to_string(),
                "output(a,hi)".to_string(),
                "complete(a,Ok)".to_string(),
                "start(b)".to_string(),
                "output(b,early)".to_string(),
            ]
        );
    }

    #[test]
    fn output_after_completion_is_discarded() {
        let recorder = Recorder::default();
        let mgr = OrderedOutputManager::new(vec!["a".into()], recorder, true);
        mgr.on_start(0);
        mgr.on_complete(0, TerminalStatus::Ok, "ok".into(), Duration::ZERO);
        mgr.on_output(0, "too late".into());
        let events = mgr.callback.events.lock().unwrap().clone();
        assert!(!events.iter().any(|e| e.contains("too late")));
    }

    #[test]
    fn non_verbose_suppresses_output_events_only() {
        let recorder = Recorder::default();
        let mgr = OrderedOutputManager::new(vec!["a".into()], recorder, false);
        mgr.on_start(0);
        mgr.on_output(0, "noisy".into());
        mgr.on_complete(0, TerminalStatus::Ok, "ok".into(), Duration::ZERO);
        let events = mgr.callback.events.lock().unwrap().clone();
        assert_eq!(events, vec!["start(a)".to_string(), "complete(a,Ok)".to_string()]);
    }
}
