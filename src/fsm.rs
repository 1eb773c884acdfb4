//! A finite state machine whose states are task factories.
//!
//! Each *state* owns a factory producing the task that runs while the state
//! is active; *links* are predicates that pick the next state, optionally
//! carrying a typed payload into the target state's factory. The machine
//! itself runs as a single task, so it can be managed, raced, stopped, and
//! nested like any other task.
//!
//! # Wiring
//!
//! ```
//! use cotask::awaiters::{wait_forever, wait_until};
//! use cotask::fsm::TaskFsm;
//! use cotask::TaskStatus;
//!
//! let fsm = TaskFsm::new();
//! let boot = fsm.state("Boot", || wait_until(|| true));
//! let idle = fsm.state("Idle", wait_forever);
//! let done = fsm.exit_state("Done");
//!
//! fsm.entry_links(vec![boot.link()]);
//! fsm.state_links(&boot, vec![done.on_complete_link()]);
//! fsm.state_links(&idle, vec![]);
//!
//! let mut machine = fsm.run();
//! while machine.resume() != TaskStatus::Done {}
//! assert_eq!(machine.take_return_value(), Some(done.id()));
//! ```
//!
//! # Link evaluation
//!
//! Once per tick the machine walks the current state's outgoing links in
//! declaration order (the entry links before a first state is entered).
//! On-complete links are skipped while the state's task is still running.
//! The first link whose predicate fires wins; its target's task is
//! constructed (receiving the payload, if any) and swapped in, killing the
//! previous state's task. Reaching an exit state terminates the machine,
//! which yields the exit state's id.

use crate::task::{Task, TaskCx};
use crate::tracing_compat::debug;
use std::cell::RefCell;
use std::rc::Rc;

/// Identifier of a state within one [`TaskFsm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId {
    idx: u32,
}

impl StateId {
    /// The id carried before any state has been entered.
    pub const INVALID: Self = Self { idx: u32::MAX };

    /// Returns whether this id names a state.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.idx != u32::MAX
    }

    fn index(self) -> Option<usize> {
        self.is_valid().then_some(self.idx as usize)
    }
}

/// Arguments passed to the transition debug callback.
#[derive(Debug, Clone)]
pub struct TransitionDebugData {
    /// Outgoing state's id ([`StateId::INVALID`] when leaving the entry
    /// prelude).
    pub old_id: StateId,
    /// Outgoing state's name (`"<entry>"` for the prelude).
    pub old_name: String,
    /// Incoming state's id.
    pub new_id: StateId,
    /// Incoming state's name.
    pub new_name: String,
}

/// Generic state-transition callback.
pub type OnTransitionFn = Rc<dyn Fn()>;
/// Debug state-transition callback.
pub type DebugTransitionFn = Rc<dyn Fn(TransitionDebugData)>;

// A matched link: where to go, and how to build the new state's task
// (`None` for exit states).
struct TransitionEvent {
    target: StateId,
    build: Option<Box<dyn FnOnce() -> Task<()>>>,
}

trait LinkEval {
    fn evaluate(&self) -> Option<TransitionEvent>;
}

struct Link<P: 'static> {
    target: Rc<StateCore<P>>,
    predicate: Box<dyn Fn() -> Option<P>>,
}

impl<P: 'static> LinkEval for Link<P> {
    fn evaluate(&self) -> Option<TransitionEvent> {
        let payload = (self.predicate)()?;
        let build = self.target.factory.clone().map(|factory| {
            Box::new(move || (*factory)(payload)) as Box<dyn FnOnce() -> Task<()>>
        });
        Some(TransitionEvent {
            target: self.target.id,
            build,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LinkKind {
    Normal,
    OnComplete,
}

/// A wired link, produced by the link methods on [`StateHandle`] and handed
/// to [`TaskFsm::entry_links`] / [`TaskFsm::state_links`].
#[derive(Clone)]
pub struct LinkHandle {
    eval: Rc<dyn LinkEval>,
    kind: LinkKind,
    has_condition: bool,
}

impl LinkHandle {
    fn new(eval: Rc<dyn LinkEval>, kind: LinkKind, has_condition: bool) -> Self {
        Self {
            eval,
            kind,
            has_condition,
        }
    }

    fn is_on_complete(&self) -> bool {
        self.kind == LinkKind::OnComplete
    }
}

// Shared state record: the factory is `None` for exit states.
struct StateCore<P: 'static> {
    id: StateId,
    factory: Option<Rc<dyn Fn(P) -> Task<()>>>,
}

/// Handle used to wire links toward (and out of) a state.
///
/// `P` is the payload type the state's factory consumes; payload-less
/// states use `P = ()`.
pub struct StateHandle<P: 'static = ()> {
    core: Rc<StateCore<P>>,
}

impl<P: 'static> StateHandle<P> {
    /// Returns the id of this state.
    #[must_use]
    pub fn id(&self) -> StateId {
        self.core.id
    }

    fn make_link(
        &self,
        predicate: impl Fn() -> Option<P> + 'static,
        kind: LinkKind,
        has_condition: bool,
    ) -> LinkHandle {
        LinkHandle::new(
            Rc::new(Link {
                target: self.core.clone(),
                predicate: Box::new(predicate),
            }),
            kind,
            has_condition,
        )
    }
}

impl StateHandle<()> {
    /// Unconditional link: always taken when evaluated.
    #[must_use]
    pub fn link(&self) -> LinkHandle {
        self.make_link(|| Some(()), LinkKind::Normal, false)
    }

    /// Conditional link: taken when `predicate` returns true.
    #[must_use]
    pub fn link_if(&self, predicate: impl Fn() -> bool + 'static) -> LinkHandle {
        self.make_link(
            move || predicate().then_some(()),
            LinkKind::Normal,
            true,
        )
    }

    /// Unconditional on-complete link: taken once the source state's task
    /// is done.
    #[must_use]
    pub fn on_complete_link(&self) -> LinkHandle {
        self.make_link(|| Some(()), LinkKind::OnComplete, false)
    }

    /// Conditional on-complete link.
    #[must_use]
    pub fn on_complete_link_if(&self, predicate: impl Fn() -> bool + 'static) -> LinkHandle {
        self.make_link(
            move || predicate().then_some(()),
            LinkKind::OnComplete,
            true,
        )
    }
}

impl<P: Clone + 'static> StateHandle<P> {
    /// Unconditional link carrying a fixed payload.
    #[must_use]
    pub fn link_with(&self, payload: P) -> LinkHandle {
        self.make_link(move || Some(payload.clone()), LinkKind::Normal, false)
    }

    /// Conditional link carrying a fixed payload.
    #[must_use]
    pub fn link_if_with(
        &self,
        predicate: impl Fn() -> bool + 'static,
        payload: P,
    ) -> LinkHandle {
        self.make_link(
            move || predicate().then(|| payload.clone()),
            LinkKind::Normal,
            true,
        )
    }

    /// Link whose predicate produces the payload: taken when it returns
    /// `Some`.
    #[must_use]
    pub fn link_fn(&self, predicate: impl Fn() -> Option<P> + 'static) -> LinkHandle {
        self.make_link(predicate, LinkKind::Normal, true)
    }

    /// On-complete link carrying a fixed payload.
    #[must_use]
    pub fn on_complete_link_with(&self, payload: P) -> LinkHandle {
        self.make_link(move || Some(payload.clone()), LinkKind::OnComplete, false)
    }

    /// On-complete link whose predicate produces the payload.
    #[must_use]
    pub fn on_complete_link_fn(&self, predicate: impl Fn() -> Option<P> + 'static) -> LinkHandle {
        self.make_link(predicate, LinkKind::OnComplete, true)
    }
}

struct StateRecord {
    name: String,
    outgoing: Vec<LinkHandle>,
    links_declared: bool,
    is_exit: bool,
}

#[derive(Default)]
struct FsmGraph {
    states: RefCell<Vec<StateRecord>>,
    entry_links: RefCell<Vec<LinkHandle>>,
}

impl FsmGraph {
    fn state_name(&self, id: StateId) -> String {
        match id.index() {
            Some(idx) => self.states.borrow()[idx].name.clone(),
            None => "<entry>".to_string(),
        }
    }

    fn is_exit(&self, id: StateId) -> bool {
        id.index()
            .is_some_and(|idx| self.states.borrow()[idx].is_exit)
    }

    // Finds the first matching transition out of `current` (or out of the
    // entry prelude while no state has been entered).
    fn evaluate_links(&self, current: StateId, current_complete: bool) -> Option<TransitionEvent> {
        let links: Vec<LinkHandle> = match current.index() {
            Some(idx) => self.states.borrow()[idx].outgoing.clone(),
            None => self.entry_links.borrow().clone(),
        };
        for link in &links {
            if link.is_on_complete() && !current_complete {
                continue;
            }
            if let Some(event) = link.eval.evaluate() {
                return Some(event);
            }
        }
        None
    }
}

/// Builder and runner for a task-backed finite state machine.
///
/// States and links are wired up front; [`TaskFsm::run`] then returns a
/// task executing the machine. The graph is shared, so one `TaskFsm` can be
/// run multiple times.
#[derive(Default)]
pub struct TaskFsm {
    graph: Rc<FsmGraph>,
}

impl TaskFsm {
    /// Creates an empty state machine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a state backed by a payload-less task factory.
    #[must_use]
    pub fn state<R: 'static>(
        &self,
        name: impl Into<String>,
        factory: impl Fn() -> Task<R> + 'static,
    ) -> StateHandle<()> {
        self.push_state(name.into(), Some(Rc::new(move |()| factory().into_void())))
    }

    /// Adds a state whose factory consumes a payload delivered by the link
    /// that enters it.
    #[must_use]
    pub fn state_with<P: 'static, R: 'static>(
        &self,
        name: impl Into<String>,
        factory: impl Fn(P) -> Task<R> + 'static,
    ) -> StateHandle<P> {
        self.push_state(
            name.into(),
            Some(Rc::new(move |payload| factory(payload).into_void())),
        )
    }

    /// Adds an exit state: entering it terminates the machine, which yields
    /// this state's id.
    #[must_use]
    pub fn exit_state(&self, name: impl Into<String>) -> StateHandle<()> {
        let handle = self.push_state(name.into(), None);
        let mut states = self.graph.states.borrow_mut();
        states
            .last_mut()
            .expect("state was just pushed")
            .is_exit = true;
        drop(states);
        handle
    }

    fn push_state<P: 'static>(
        &self,
        name: String,
        factory: Option<Rc<dyn Fn(P) -> Task<()>>>,
    ) -> StateHandle<P> {
        let mut states = self.graph.states.borrow_mut();
        let id = StateId {
            idx: u32::try_from(states.len()).expect("state count fits in u32"),
        };
        states.push(StateRecord {
            name,
            outgoing: Vec::new(),
            links_declared: false,
            is_exit: false,
        });
        StateHandle {
            core: Rc::new(StateCore { id, factory }),
        }
    }

    /// Declares the machine's entry links, walked while no state has been
    /// entered yet.
    ///
    /// # Panics
    ///
    /// Panics if any entry link is an on-complete link.
    pub fn entry_links(&self, links: Vec<LinkHandle>) {
        assert!(
            links.iter().all(|link| !link.is_on_complete()),
            "entry links may not contain on-complete links"
        );
        *self.graph.entry_links.borrow_mut() = links;
    }

    /// Declares all outgoing links of `origin`, in evaluation order. May be
    /// called at most once per state.
    ///
    /// # Panics
    ///
    /// Panics if links were already declared for `origin`, or if an
    /// unconditional on-complete link is followed by another on-complete
    /// link (which could never be reached).
    pub fn state_links<P: 'static>(&self, origin: &StateHandle<P>, links: Vec<LinkHandle>) {
        let idx = origin
            .id()
            .index()
            .expect("state handles always carry a valid id");
        let mut saw_unconditional_on_complete = false;
        for link in &links {
            if link.is_on_complete() {
                assert!(
                    !saw_unconditional_on_complete,
                    "unreachable link: follows an unconditional on-complete link"
                );
                if !link.has_condition {
                    saw_unconditional_on_complete = true;
                }
            }
        }
        let mut states = self.graph.states.borrow_mut();
        let record = &mut states[idx];
        assert!(
            !record.links_declared,
            "outgoing links may only be declared once per state"
        );
        record.outgoing = links;
        record.links_declared = true;
    }

    /// Starts the machine, returning the task that runs it. The task
    /// finishes with the id of the exit state that was reached.
    #[must_use]
    pub fn run(&self) -> Task<StateId> {
        self.run_with(None, None)
    }

    /// Like [`run`](TaskFsm::run), with optional transition callbacks: the
    /// generic callback fires on every transition, the debug callback
    /// additionally receives the old/new state ids and names. Both fire
    /// before the new state's task is constructed.
    #[must_use]
    pub fn run_with(
        &self,
        on_transition: Option<OnTransitionFn>,
        debug_fn: Option<DebugTransitionFn>,
    ) -> Task<StateId> {
        let graph = self.graph.clone();
        Task::new(move |cx: TaskCx| async move {
            crate::task_name!(cx, "TaskFsm");
            let mut current = StateId::INVALID;
            let mut task: Task<()> = Task::invalid();
            loop {
                if let Some(event) = graph.evaluate_links(current, task.is_done()) {
                    if let Some(callback) = on_transition.as_deref() {
                        callback();
                    }
                    let new_name = graph.state_name(event.target);
                    debug!(from = %graph.state_name(current), to = %new_name, "state transition");
                    if let Some(debug_fn) = debug_fn.as_deref() {
                        debug_fn(TransitionDebugData {
                            old_id: current,
                            old_name: graph.state_name(current),
                            new_id: event.target,
                            new_name,
                        });
                    }
                    if graph.is_exit(event.target) {
                        return event.target;
                    }
                    current = event.target;
                    cx.remove_stop_target(&task);
                    // Building the replacement task kills the old one when
                    // the handle is overwritten.
                    task = (event.build.expect("non-exit states carry a factory"))();
                    cx.add_stop_target(&task);
                }
                task.resume();
                cx.suspend().await;
            }
        })
    }
}
