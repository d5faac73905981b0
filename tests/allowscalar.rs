//! The permanent toggle rewrites process-wide state, so it gets its own
//! test binary and a single test function.

use devarray::prelude::*;
use devarray::{allowscalar, current_policy, CpuBackend, ScalarPolicy};

#[test]
fn test_allowscalar_sets_task_and_future_default() {
    let _ = tracing_subscriber::fmt::try_init();
    let backend = BackendHandle::new(CpuBackend::new());
    let a = DeviceArray::from_vec(&backend, &[3], vec![1i32, 2, 3]).unwrap();

    allowscalar(false);
    assert_eq!(current_policy(), ScalarPolicy::Disallowed);
    assert!(matches!(
        a.get(&[0]),
        Err(DeviceError::ScalarAccessDisallowed { .. })
    ));

    // A task started later inherits the new default.
    let spawned = std::thread::spawn(current_policy).join().unwrap();
    assert_eq!(spawned, ScalarPolicy::Disallowed);

    allowscalar(true);
    assert_eq!(current_policy(), ScalarPolicy::Allowed);
    assert_eq!(a.get(&[2]).unwrap(), 3);
    let spawned = std::thread::spawn(|| {
        let first = current_policy();
        allowscalar(false);
        first
    })
    .join()
    .unwrap();
    assert_eq!(spawned, ScalarPolicy::Allowed);

    // The other task's toggle changed the default, not this task's policy.
    assert_eq!(current_policy(), ScalarPolicy::Allowed);
    let later = std::thread::spawn(current_policy).join().unwrap();
    assert_eq!(later, ScalarPolicy::Disallowed);

    // Scoped enable still works under a permanent disable.
    std::thread::spawn(move || {
        assert_eq!(with_scalar_access_allowed(|| a.get(&[1])).unwrap(), 2);
        assert_eq!(current_policy(), ScalarPolicy::Disallowed);
    })
    .join()
    .unwrap();
}
