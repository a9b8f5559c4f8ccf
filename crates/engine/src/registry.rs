//! Interceptor bookkeeping on top of the hook transaction service.
//!
//! Every intercepted function owns a process-lifetime [`InterceptorSlot`]
//! holding the address that reaches its original implementation. Slots are
//! filled exactly once, after the transaction that attached them committed.
//!
//! Static interceptors are staged with [`Registry::register`] and applied as a
//! group by [`Registry::commit`]. Late interceptors target functions whose
//! address only becomes known while the host runs, such as window procedures
//! passed to class registration or window creation. They are declared up front
//! with [`Registry::register_late`] and installed by [`Registry::observe`] in a
//! transaction of their own the first time a matching discovery is seen.

use core::{
    fmt::{self, Debug, Formatter},
    mem,
    ops::RangeInclusive,
    sync::atomic::{AtomicBool, Ordering},
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use reskin_hook::{HookService, HookTransaction};
use tracing::{debug, error, trace, warn};

use crate::error::{EngineError, Result};

/// Late bound storage for an original function address.
pub struct InterceptorSlot {
    name: &'static str,
    original: OnceCell<usize>,
}

impl InterceptorSlot {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            original: OnceCell::new(),
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Address calling the original implementation, once installed.
    #[inline]
    pub fn get(&self) -> Option<usize> {
        self.original.get().copied()
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.original.get().is_some()
    }

    /// Original implementation as a function pointer.
    ///
    /// # Safety
    /// `F` must be the function pointer type of the intercepted function.
    #[inline]
    pub unsafe fn original_fn<F: Copy>(&self) -> Option<F> {
        const { assert!(mem::size_of::<F>() == mem::size_of::<usize>()) };

        let address = self.get()?;
        Some(unsafe { mem::transmute_copy::<usize, F>(&address) })
    }

    /// Original implementation, blocking until its transaction bound it.
    ///
    /// # Safety
    /// Same as [`InterceptorSlot::original_fn`]. Only replacement functions may
    /// call this, as they are unreachable before the attaching commit.
    #[inline]
    pub unsafe fn wait_fn<F: Copy>(&self) -> F {
        const { assert!(mem::size_of::<F>() == mem::size_of::<usize>()) };

        let address = *self.original.wait();
        unsafe { mem::transmute_copy::<usize, F>(&address) }
    }

    fn bind(&self, address: usize) -> bool {
        self.original.set(address).is_ok()
    }
}

impl Debug for InterceptorSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(address) => write!(f, "InterceptorSlot({}: {address:#x})", self.name),
            None => write!(f, "InterceptorSlot({}: unbound)", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Interceptor {
    slot: &'static InterceptorSlot,
    target: usize,
    replacement: usize,
}

/// Interceptor installed once a matching function is discovered.
#[derive(Debug)]
pub struct LateTarget {
    slot: &'static InterceptorSlot,
    replacement: usize,
    class: &'static [u8],
    ids: Option<RangeInclusive<u32>>,
    claimed: AtomicBool,
}

impl LateTarget {
    /// Match discoveries of window class `class`.
    pub const fn new(
        slot: &'static InterceptorSlot,
        replacement: usize,
        class: &'static [u8],
    ) -> Self {
        Self {
            slot,
            replacement,
            class,
            ids: None,
            claimed: AtomicBool::new(false),
        }
    }

    /// Restrict matches to discoveries carrying an identifier in `ids`.
    pub fn with_ids(mut self, ids: RangeInclusive<u32>) -> Self {
        self.ids = Some(ids);
        self
    }

    fn matches(&self, discovery: &Discovery) -> bool {
        if discovery.class != self.class {
            return false;
        }

        match (&self.ids, discovery.id) {
            (None, _) => true,
            (Some(ids), Some(id)) => ids.contains(&id),
            (Some(_), None) => false,
        }
    }
}

/// A function address observed flowing through an intercepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discovery<'a> {
    pub class: &'a [u8],
    pub id: Option<u32>,
    pub address: usize,
}

/// Result of observing a [`Discovery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateOutcome {
    Installed(&'static str),

    /// The target was already discovered or its address is already
    /// intercepted. Nothing was hooked.
    Duplicate(&'static str),

    NotMatched,

    /// Installing failed. The target is consumed and not retried.
    Failed(&'static str),
}

/// Tracks static and late interceptors.
pub struct Registry<H> {
    service: H,
    thread: Option<u32>,
    pending: Vec<Interceptor>,
    late: Vec<LateTarget>,
    installed: Mutex<Vec<usize>>,
}

impl<H: HookService> Registry<H> {
    pub fn new(service: H) -> Self {
        Self {
            service,
            thread: None,
            pending: Vec::new(),
            late: Vec::new(),
            installed: Mutex::new(Vec::new()),
        }
    }

    /// Enlist `thread_id` in every transaction.
    pub fn with_thread(mut self, thread_id: u32) -> Self {
        self.thread = Some(thread_id);
        self
    }

    #[inline]
    pub fn service(&self) -> &H {
        &self.service
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Addresses currently intercepted.
    pub fn installed(&self) -> Vec<usize> {
        self.installed.lock().clone()
    }

    /// Stage `target` to be redirected to `replacement` on the next commit.
    pub fn register(
        &mut self,
        slot: &'static InterceptorSlot,
        target: usize,
        replacement: usize,
    ) -> &mut Self {
        if slot.is_bound() || self.pending.iter().any(|pending| pending.slot.name == slot.name) {
            warn!("{} is already registered", slot.name);
            return self;
        }

        trace!("staging {} at {target:#x}", slot.name);
        self.pending.push(Interceptor {
            slot,
            target,
            replacement,
        });
        self
    }

    /// Apply every staged interceptor in one transaction.
    ///
    /// Nothing is installed if any interceptor fails.
    #[tracing::instrument(skip(self))]
    pub fn commit(&mut self, group: &'static str) -> Result<()> {
        let pending = mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let mut transaction = self.begin(group)?;

        let mut originals = Vec::with_capacity(pending.len());
        for interceptor in &pending {
            match unsafe { transaction.attach(interceptor.target, interceptor.replacement) } {
                Ok(original) => originals.push(original),
                Err(source) => {
                    transaction.abort();
                    error!("cannot attach {}. err: {source}", interceptor.slot.name);
                    return Err(EngineError::TransactionFailure {
                        target: interceptor.slot.name,
                        source,
                    });
                }
            }
        }

        transaction.commit().map_err(|source| {
            error!("cannot commit {group} interceptors. err: {source}");
            EngineError::TransactionFailure {
                target: group,
                source,
            }
        })?;

        let mut installed = self.installed.lock();
        for (interceptor, original) in pending.iter().zip(originals) {
            interceptor.slot.bind(original);
            installed.push(interceptor.target);
        }
        debug!("{group}: {} interceptor(s) installed", pending.len());

        Ok(())
    }

    /// Declare an interceptor installed on first matching discovery.
    pub fn register_late(&mut self, target: LateTarget) -> &mut Self {
        self.late.push(target);
        self
    }

    /// Install the late interceptor matching `discovery`, if any.
    ///
    /// Each late target is installed at most once. Later matching
    /// discoveries are reported as duplicates and ignored.
    pub fn observe(&self, discovery: &Discovery) -> LateOutcome {
        let Some(target) = self.late.iter().find(|target| target.matches(discovery)) else {
            return LateOutcome::NotMatched;
        };
        let name = target.slot.name;

        if target.slot.is_bound() || target.claimed.swap(true, Ordering::AcqRel) {
            debug!(
                "ignoring duplicate discovery of {name} at {:#x}",
                discovery.address
            );
            return LateOutcome::Duplicate(name);
        }

        match self.install(target.slot, discovery.address, target.replacement) {
            Ok(()) => LateOutcome::Installed(name),
            Err(EngineError::AlreadyIntercepted { .. }) => LateOutcome::Duplicate(name),
            Err(err) => {
                error!("cannot hook {name}. err: {err}");
                LateOutcome::Failed(name)
            }
        }
    }

    /// Redirect `target` immediately through a single interceptor transaction.
    ///
    /// Fails with [`EngineError::AlreadyIntercepted`] without binding `slot`
    /// when `slot` is bound or `target` is already redirected.
    #[tracing::instrument(skip(self))]
    pub fn install(
        &self,
        slot: &'static InterceptorSlot,
        target: usize,
        replacement: usize,
    ) -> Result<()> {
        if slot.is_bound() || self.installed.lock().contains(&target) {
            warn!("{target:#x} is already intercepted, skipping {}", slot.name);
            return Err(EngineError::AlreadyIntercepted {
                target: slot.name,
                address: target,
            });
        }

        let to_failure = |source| EngineError::TransactionFailure {
            target: slot.name,
            source,
        };

        let mut transaction = self.begin(slot.name)?;
        let original = unsafe { transaction.attach(target, replacement) }.map_err(to_failure)?;
        transaction.commit().map_err(to_failure)?;

        slot.bind(original);
        self.installed.lock().push(target);
        debug!("{} installed at {target:#x}", slot.name);

        Ok(())
    }

    /// Remove every installed interceptor.
    pub fn detach_all(&self) -> Result<()> {
        let mut installed = self.installed.lock();
        if installed.is_empty() {
            return Ok(());
        }

        let mut transaction = self.begin("detach")?;
        for target in installed.iter() {
            if let Err(source) = unsafe { transaction.detach(*target) } {
                transaction.abort();
                return Err(EngineError::TransactionFailure {
                    target: "detach",
                    source,
                });
            }
        }

        transaction
            .commit()
            .map_err(|source| EngineError::TransactionFailure {
                target: "detach",
                source,
            })?;
        debug!("{} interceptor(s) detached", installed.len());
        installed.clear();

        Ok(())
    }

    fn begin(&self, target: &'static str) -> Result<H::Transaction> {
        let to_failure = |source| EngineError::TransactionFailure { target, source };

        let mut transaction = self.service.begin().map_err(to_failure)?;
        if let Some(thread) = self.thread {
            transaction.update_thread(thread).map_err(to_failure)?;
        }

        Ok(transaction)
    }
}

impl<H> Debug for Registry<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("thread", &self.thread)
            .field("pending", &self.pending)
            .field("late", &self.late)
            .field("installed", &self.installed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use reskin_hook::{DetourError, DetourResult, HookOp};

    use super::*;

    #[derive(Debug, Default)]
    struct State {
        hooked: Vec<(usize, usize)>,
        commits: usize,
        aborts: usize,
        threads: Vec<u32>,
        fail_attach: Option<usize>,
        fail_commit: bool,
    }

    #[derive(Debug, Default, Clone)]
    struct MockService(Rc<RefCell<State>>);

    struct MockTransaction {
        state: Rc<RefCell<State>>,
        staged: Vec<(usize, usize)>,
        detached: Vec<usize>,
    }

    impl HookService for MockService {
        type Transaction = MockTransaction;

        fn begin(&self) -> DetourResult<MockTransaction> {
            Ok(MockTransaction {
                state: self.0.clone(),
                staged: Vec::new(),
                detached: Vec::new(),
            })
        }
    }

    impl HookTransaction for MockTransaction {
        fn update_thread(&mut self, thread_id: u32) -> DetourResult<()> {
            self.state.borrow_mut().threads.push(thread_id);
            Ok(())
        }

        unsafe fn attach(&mut self, target: usize, detour: usize) -> DetourResult<usize> {
            if self.state.borrow().fail_attach == Some(target) {
                return Err(DetourError::new(HookOp::Attach, 9));
            }

            self.staged.push((target, detour));
            Ok(target + 0x1000)
        }

        unsafe fn detach(&mut self, target: usize) -> DetourResult<()> {
            self.detached.push(target);
            Ok(())
        }

        fn commit(self) -> DetourResult<()> {
            let mut state = self.state.borrow_mut();
            if state.fail_commit {
                return Err(DetourError::new(HookOp::Commit, 5));
            }

            state.commits += 1;
            state.hooked.extend(self.staged);
            state.hooked.retain(|(target, _)| !self.detached.contains(target));
            Ok(())
        }

        fn abort(self) {
            self.state.borrow_mut().aborts += 1;
        }
    }

    fn leak(name: &'static str) -> &'static InterceptorSlot {
        Box::leak(Box::new(InterceptorSlot::new(name)))
    }

    #[test]
    fn commit_binds_after_success() {
        let service = MockService::default();
        let mut registry = Registry::new(service.clone()).with_thread(7);
        let a = leak("a");
        let b = leak("b");

        registry.register(a, 0x10, 0xa0).register(b, 0x20, 0xb0);
        assert!(!a.is_bound());
        registry.commit("always-on").unwrap();

        assert_eq!(a.get(), Some(0x1010));
        assert_eq!(b.get(), Some(0x1020));
        assert_eq!(registry.pending(), 0);
        assert_eq!(registry.installed(), [0x10, 0x20]);

        let state = service.0.borrow();
        assert_eq!(state.hooked, [(0x10, 0xa0), (0x20, 0xb0)]);
        assert_eq!(state.commits, 1);
        assert_eq!(state.threads, [7]);
    }

    #[test]
    fn failed_attach_installs_nothing() {
        let service = MockService::default();
        service.0.borrow_mut().fail_attach = Some(0x20);
        let mut registry = Registry::new(service.clone());
        let a = leak("a");
        let b = leak("b");

        registry.register(a, 0x10, 0xa0).register(b, 0x20, 0xb0);
        let err = registry.commit("theme").unwrap_err();

        assert!(matches!(
            err,
            EngineError::TransactionFailure { target: "b", .. }
        ));
        assert!(!a.is_bound());
        assert!(!b.is_bound());
        assert!(registry.installed().is_empty());

        let state = service.0.borrow();
        assert!(state.hooked.is_empty());
        assert_eq!(state.aborts, 1);
    }

    #[test]
    fn failed_commit_reports_group() {
        let service = MockService::default();
        service.0.borrow_mut().fail_commit = true;
        let mut registry = Registry::new(service.clone());
        let a = leak("a");

        registry.register(a, 0x10, 0xa0);
        let err = registry.commit("always-on").unwrap_err();
        assert!(matches!(
            err,
            EngineError::TransactionFailure {
                target: "always-on",
                ..
            }
        ));
        assert!(!a.is_bound());
    }

    #[test]
    fn groups_are_independent() {
        let service = MockService::default();
        let mut registry = Registry::new(service.clone());
        let base = leak("base");
        let theme = leak("theme");

        registry.register(base, 0x10, 0xa0);
        registry.commit("always-on").unwrap();

        service.0.borrow_mut().fail_attach = Some(0x20);
        registry.register(theme, 0x20, 0xb0);
        assert!(registry.commit("theme").is_err());

        assert!(base.is_bound());
        assert!(!theme.is_bound());
        assert_eq!(service.0.borrow().hooked, [(0x10, 0xa0)]);
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let mut registry = Registry::new(MockService::default());
        let a = leak("a");

        registry.register(a, 0x10, 0xa0).register(a, 0x10, 0xa0);
        assert_eq!(registry.pending(), 1);
    }

    #[test]
    fn late_target_installs_once() {
        let service = MockService::default();
        let mut registry = Registry::new(service.clone());
        let comp = leak("compressor");
        let denoiser = leak("denoiser");

        registry
            .register_late(LateTarget::new(comp, 0xc0, b"panel").with_ids(1100..=1104))
            .register_late(LateTarget::new(denoiser, 0xd0, b"panel").with_ids(1200..=1204));

        let discovery = Discovery {
            class: b"panel",
            id: Some(1102),
            address: 0x500,
        };
        assert_eq!(registry.observe(&discovery), LateOutcome::Installed("compressor"));
        assert_eq!(registry.observe(&discovery), LateOutcome::Duplicate("compressor"));
        assert_eq!(comp.get(), Some(0x1500));
        assert!(!denoiser.is_bound());

        assert_eq!(
            registry.observe(&Discovery {
                class: b"panel",
                id: Some(1200),
                address: 0x600,
            }),
            LateOutcome::Installed("denoiser")
        );

        let state = service.0.borrow();
        assert_eq!(state.hooked, [(0x500, 0xc0), (0x600, 0xd0)]);
        assert_eq!(state.commits, 2);
    }

    #[test]
    fn late_target_predicates() {
        let mut registry = Registry::new(MockService::default());
        let main = leak("main");
        let comp = leak("compressor");

        registry
            .register_late(LateTarget::new(main, 0xa0, b"main"))
            .register_late(LateTarget::new(comp, 0xc0, b"panel").with_ids(1100..=1104));

        for discovery in [
            Discovery {
                class: b"panel",
                id: Some(1150),
                address: 0x500,
            },
            Discovery {
                class: b"panel",
                id: None,
                address: 0x500,
            },
            Discovery {
                class: b"other",
                id: Some(1100),
                address: 0x500,
            },
        ] {
            assert_eq!(registry.observe(&discovery), LateOutcome::NotMatched);
        }
        assert!(!comp.is_bound());

        assert_eq!(
            registry.observe(&Discovery {
                class: b"main",
                id: None,
                address: 0x700,
            }),
            LateOutcome::Installed("main")
        );
    }

    #[test]
    fn failed_late_install_is_consumed() {
        let service = MockService::default();
        service.0.borrow_mut().fail_attach = Some(0x500);
        let mut registry = Registry::new(service.clone());
        let comp = leak("compressor");
        registry.register_late(LateTarget::new(comp, 0xc0, b"panel"));

        let discovery = Discovery {
            class: b"panel",
            id: None,
            address: 0x500,
        };
        assert_eq!(registry.observe(&discovery), LateOutcome::Failed("compressor"));
        assert_eq!(registry.observe(&discovery), LateOutcome::Duplicate("compressor"));
        assert!(!comp.is_bound());
    }

    #[test]
    fn install_rejects_intercepted_address() {
        let service = MockService::default();
        let mut registry = Registry::new(service.clone());
        let first = leak("first");
        let second = leak("second");
        let late = leak("late");

        registry.install(first, 0x30, 0xa0).unwrap();
        assert!(matches!(
            registry.install(second, 0x30, 0xb0),
            Err(EngineError::AlreadyIntercepted {
                target: "second",
                address: 0x30
            })
        ));
        assert!(!second.is_bound());
        assert!(matches!(
            registry.install(first, 0x40, 0xa0),
            Err(EngineError::AlreadyIntercepted { target: "first", .. })
        ));

        registry.register_late(LateTarget::new(late, 0xc0, b"panel"));
        assert_eq!(
            registry.observe(&Discovery {
                class: b"panel",
                id: None,
                address: 0x30,
            }),
            LateOutcome::Duplicate("late")
        );
        assert!(!late.is_bound());
        assert_eq!(service.0.borrow().hooked, [(0x30, 0xa0)]);
    }

    #[test]
    fn detach_all_removes_everything() {
        let service = MockService::default();
        let mut registry = Registry::new(service.clone());
        let a = leak("a");
        let b = leak("b");

        registry.register(a, 0x10, 0xa0);
        registry.commit("always-on").unwrap();
        registry.install(b, 0x20, 0xb0).unwrap();
        assert_eq!(service.0.borrow().hooked.len(), 2);

        registry.detach_all().unwrap();
        assert!(service.0.borrow().hooked.is_empty());
        assert!(registry.installed().is_empty());
        registry.detach_all().unwrap();
    }

    #[test]
    fn original_fn_casts_address() {
        let slot = leak("fn");
        assert!(unsafe { slot.original_fn::<fn() -> u32>() }.is_none());

        fn answer() -> u32 {
            42
        }
        assert!(slot.bind(answer as fn() -> u32 as usize));
        assert!(!slot.bind(0));

        let f = unsafe { slot.original_fn::<fn() -> u32>() }.unwrap();
        assert_eq!(f(), 42);
        assert_eq!(unsafe { slot.wait_fn::<fn() -> u32>() }(), 42);
    }
}
