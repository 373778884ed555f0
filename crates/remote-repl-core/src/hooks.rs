//! Evaluator lifecycle hooks.

use std::{fmt, sync::Arc};

use crate::traits::EvaluatorHandle;

type EvalHook = Arc<dyn Fn() + Send + Sync>;
type SessionHook = Arc<dyn Fn(Arc<dyn EvaluatorHandle>) + Send + Sync>;

/// Points in the evaluator lifecycle that hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// Just before an expression is evaluated.
    BeforeEval,
    /// Just after an expression is evaluated.
    AfterEval,
    /// Once, before the first prompt of a session.
    BeforeSession,
}

/// Named hook registry.
///
/// Several hooks may be registered per event; they fire in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    before_eval: Vec<(String, EvalHook)>,
    after_eval: Vec<(String, EvalHook)>,
    before_session: Vec<(String, SessionHook)>,
}

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook fired before each evaluation.
    pub fn before_eval<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.before_eval.push((name.into(), Arc::new(hook)));
        self
    }

    /// Register a hook fired after each evaluation.
    pub fn after_eval<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.after_eval.push((name.into(), Arc::new(hook)));
        self
    }

    /// Register a hook fired once when a session starts.
    pub fn before_session<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn(Arc<dyn EvaluatorHandle>) + Send + Sync + 'static,
    {
        self.before_session.push((name.into(), Arc::new(hook)));
        self
    }

    /// Append all hooks of `other` after the ones already registered.
    pub fn merge(&mut self, other: Self) -> &mut Self {
        self.before_eval.extend(other.before_eval);
        self.after_eval.extend(other.after_eval);
        self.before_session.extend(other.before_session);
        self
    }

    pub fn run_before_eval(&self) {
        for (_, hook) in &self.before_eval {
            hook();
        }
    }

    pub fn run_after_eval(&self) {
        for (_, hook) in &self.after_eval {
            hook();
        }
    }

    pub fn run_before_session(&self, handle: &Arc<dyn EvaluatorHandle>) {
        for (name, hook) in &self.before_session {
            tracing::trace!(hook = %name, "Running before_session hook");
            hook(Arc::clone(handle));
        }
    }

    /// Names of the hooks registered for `event`, in firing order.
    #[must_use]
    pub fn names(&self, event: HookEvent) -> Vec<&str> {
        match event {
            HookEvent::BeforeEval => self.before_eval.iter().map(|(n, _)| n.as_str()).collect(),
            HookEvent::AfterEval => self.after_eval.iter().map(|(n, _)| n.as_str()).collect(),
            HookEvent::BeforeSession => self
                .before_session
                .iter()
                .map(|(n, _)| n.as_str())
                .collect(),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_eval", &self.names(HookEvent::BeforeEval))
            .field("after_eval", &self.names(HookEvent::AfterEval))
            .field("before_session", &self.names(HookEvent::BeforeSession))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Named(&'static str);

    impl EvaluatorHandle for Named {
        fn status(&self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_hooks_fire_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::new();

        for name in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            hooks.before_eval(name, move || log.lock().unwrap().push(name));
        }

        hooks.run_before_eval();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(
            hooks.names(HookEvent::BeforeEval),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn test_events_are_independent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = Hooks::new();
        {
            let log = Arc::clone(&log);
            hooks.before_eval("capture", move || log.lock().unwrap().push("before"));
        }
        {
            let log = Arc::clone(&log);
            hooks.after_eval("uncapture", move || log.lock().unwrap().push("after"));
        }

        hooks.run_after_eval();
        hooks.run_before_eval();
        assert_eq!(*log.lock().unwrap(), vec!["after", "before"]);
    }

    #[test]
    fn test_before_session_receives_handle() {
        let seen = Arc::new(Mutex::new(None));
        let mut hooks = Hooks::new();
        {
            let seen = Arc::clone(&seen);
            hooks.before_session("grab", move |handle| {
                *seen.lock().unwrap() = Some(handle.status());
            });
        }

        let handle: Arc<dyn EvaluatorHandle> = Arc::new(Named("repl#1"));
        hooks.run_before_session(&handle);
        assert_eq!(seen.lock().unwrap().as_deref(), Some("repl#1"));
    }

    #[test]
    fn test_merge_appends_after_existing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ours = Hooks::new();
        let mut theirs = Hooks::new();
        {
            let log = Arc::clone(&log);
            ours.after_eval("ours", move || log.lock().unwrap().push("ours"));
        }
        {
            let log = Arc::clone(&log);
            theirs.after_eval("theirs", move || log.lock().unwrap().push("theirs"));
        }

        ours.merge(theirs);
        ours.run_after_eval();
        assert_eq!(*log.lock().unwrap(), vec!["ours", "theirs"]);
    }
}
