//! Scalar-access guard.
//!
//! Reading or writing a single element of a device array from the host costs
//! a full device round trip. Code that does it in a loop is almost always a
//! bug, so every host-side element access goes through
//! [`assert_scalar_allowed`], which consults a per-task [`ScalarPolicy`]:
//!
//! | policy       | access                              | next policy  |
//! |--------------|-------------------------------------|--------------|
//! | `Disallowed` | fails with `ScalarAccessDisallowed` | `Disallowed` |
//! | `Warn`       | succeeds, logs one warning          | `Warned`     |
//! | `Warned`     | succeeds silently                   | `Warned`     |
//! | `Allowed`    | succeeds silently                   | `Allowed`    |
//!
//! A task here is an OS thread; tasks never share policy state. The policy
//! of a new task comes from the process-wide default when one was set
//! (through [`allowscalar`] or the `DEVARRAY_SCALAR_ACCESS` environment
//! variable), otherwise `Warn` when stdin is a terminal and `Disallowed`
//! when it is not.

use std::cell::{Cell, RefCell};
use std::io::IsTerminal;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use devarray_traits::{DeviceError, Result};
use tracing::warn;

/// Environment variable seeding the process-wide default policy.
pub const SCALAR_ACCESS_ENV: &str = "DEVARRAY_SCALAR_ACCESS";

/// Per-task scalar-access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScalarPolicy {
    Allowed = 1,
    Warn = 2,
    Warned = 3,
    Disallowed = 4,
}

impl ScalarPolicy {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Allowed),
            2 => Some(Self::Warn),
            3 => Some(Self::Warned),
            4 => Some(Self::Disallowed),
            _ => None,
        }
    }

    /// Apply one access attempt to this policy.
    ///
    /// Returns the outcome and the policy the task moves to. A rejected
    /// attempt leaves the policy unchanged.
    pub fn on_access(self, op: &'static str) -> (Result<AccessOutcome>, ScalarPolicy) {
        match self {
            ScalarPolicy::Disallowed => (Err(DeviceError::ScalarAccessDisallowed { op }), self),
            ScalarPolicy::Warn => (Ok(AccessOutcome::Warned), ScalarPolicy::Warned),
            ScalarPolicy::Warned | ScalarPolicy::Allowed => (Ok(AccessOutcome::Silent), self),
        }
    }
}

impl FromStr for ScalarPolicy {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allowed" | "allow" => Ok(Self::Allowed),
            "warn" => Ok(Self::Warn),
            "disallowed" | "disallow" => Ok(Self::Disallowed),
            _ => Err(DeviceError::InvalidConfig {
                key: SCALAR_ACCESS_ENV,
                value: s.to_string(),
            }),
        }
    }
}

/// What a permitted access attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Permitted without a diagnostic.
    Silent,
    /// Permitted, and the one-time warning for this task was emitted.
    Warned,
}

// ============================================================================
// Process-wide default
// ============================================================================

const UNSET: u8 = 0;

/// Default written by [`allowscalar`]; `UNSET` until then.
static DEFAULT_POLICY: AtomicU8 = AtomicU8::new(UNSET);

static ENV_POLICY: OnceLock<Option<ScalarPolicy>> = OnceLock::new();

fn env_policy() -> Option<ScalarPolicy> {
    *ENV_POLICY.get_or_init(|| {
        let raw = std::env::var(SCALAR_ACCESS_ENV).ok()?;
        match raw.parse::<ScalarPolicy>() {
            Ok(policy) => Some(policy),
            Err(err) => {
                warn!(target: "devarray::scalar", %err, "ignoring scalar access setting");
                None
            }
        }
    })
}

/// Process-wide default for new tasks, if one was configured.
pub fn default_policy() -> Option<ScalarPolicy> {
    ScalarPolicy::from_u8(DEFAULT_POLICY.load(Ordering::Acquire)).or_else(env_policy)
}

/// Policy a new task starts with.
pub fn initial_policy(default: Option<ScalarPolicy>, interactive: bool) -> ScalarPolicy {
    default.unwrap_or(if interactive {
        ScalarPolicy::Warn
    } else {
        ScalarPolicy::Disallowed
    })
}

fn is_interactive() -> bool {
    std::io::stdin().is_terminal()
}

// ============================================================================
// Task-local policy
// ============================================================================

thread_local! {
    static TASK_POLICY: Cell<Option<ScalarPolicy>> = const { Cell::new(None) };
    /// Policies saved by the live scoped guards, outermost first, tagged
    /// with the id of the guard that saved them.
    static SAVED: RefCell<Vec<(u64, ScalarPolicy)>> = const { RefCell::new(Vec::new()) };
    static NEXT_GUARD_ID: Cell<u64> = const { Cell::new(0) };
}

fn load() -> ScalarPolicy {
    TASK_POLICY.with(|cell| match cell.get() {
        Some(policy) => policy,
        None => {
            let policy = initial_policy(default_policy(), is_interactive());
            cell.set(Some(policy));
            policy
        }
    })
}

pub(crate) fn store(policy: ScalarPolicy) {
    TASK_POLICY.with(|cell| cell.set(Some(policy)));
}

/// Policy currently in effect for this task.
pub fn current_policy() -> ScalarPolicy {
    load()
}

/// Interception hook for host-side element access.
///
/// `op` names the operation in diagnostics (`"getindex"`, `"setindex"`).
pub fn assert_scalar_allowed(op: &'static str) -> Result<AccessOutcome> {
    let (outcome, next) = load().on_access(op);
    let outcome = outcome?;
    if outcome == AccessOutcome::Warned {
        warn!(
            target: "devarray::scalar",
            op,
            "performing scalar {op} on a device array; this is very slow and \
             will be an error in non-interactive sessions. Wrap the access in \
             `with_scalar_access_allowed` if it is intended."
        );
    }
    store(next);
    Ok(outcome)
}

// ============================================================================
// Scoped and permanent overrides
// ============================================================================

/// Restores the task policy from before its creation when dropped.
///
/// Created by [`allow_scalar_access`]. Tied to the creating thread. Guards
/// nest: dropping one also ends every guard created after it, so the task
/// returns to the state it had before this guard whatever the drop order.
#[must_use = "scalar access is only allowed while the guard is alive"]
#[derive(Debug)]
pub struct ScalarAccessGuard {
    id: u64,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScalarAccessGuard {
    fn drop(&mut self) {
        let (id, depth) = (self.id, self.depth);
        // The thread-local may already be gone during thread teardown.
        let _ = SAVED.try_with(|saved| {
            let mut saved = saved.borrow_mut();
            // Already ended by an enclosing guard.
            if saved.get(depth).map(|&(owner, _)| owner) != Some(id) {
                return;
            }
            if depth + 1 != saved.len() {
                warn!(
                    target: "devarray::scalar",
                    depth,
                    live = saved.len(),
                    "scalar access guard dropped before guards created after it"
                );
            }
            let (_, previous) = saved[depth];
            saved.truncate(depth);
            store(previous);
        });
    }
}

/// Allow scalar access on this task until the returned guard is dropped.
pub fn allow_scalar_access() -> ScalarAccessGuard {
    let previous = load();
    let id = NEXT_GUARD_ID.with(|next| {
        let id = next.get();
        next.set(id.wrapping_add(1));
        id
    });
    let depth = SAVED.with(|saved| {
        let mut saved = saved.borrow_mut();
        saved.push((id, previous));
        saved.len() - 1
    });
    store(ScalarPolicy::Allowed);
    ScalarAccessGuard {
        id,
        depth,
        _not_send: PhantomData,
    }
}

/// Run `f` with scalar access allowed on this task.
///
/// The policy in effect before the call is restored afterwards, also when
/// `f` panics.
pub fn with_scalar_access_allowed<R>(f: impl FnOnce() -> R) -> R {
    let _guard = allow_scalar_access();
    f()
}

/// Permanently allow or disallow scalar access.
///
/// Sets this task's policy and the default for tasks started afterwards.
/// Other running tasks are unaffected. Prefer [`with_scalar_access_allowed`].
pub fn allowscalar(allow: bool) {
    let policy = if allow {
        warn!(
            target: "devarray::scalar",
            "allowscalar(true) is discouraged; use `with_scalar_access_allowed` instead"
        );
        ScalarPolicy::Allowed
    } else {
        ScalarPolicy::Disallowed
    };
    store(policy);
    DEFAULT_POLICY.store(policy as u8, Ordering::Release);
}
