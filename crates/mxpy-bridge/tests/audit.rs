//! The deallocation audit itself
//!
//! Kept in its own test binary: the audit is process-wide, and these tests
//! record violations on purpose.

use mxpy_bridge::buffer::Buffer;
use mxpy_bridge::{audit, Host};
use pretty_assertions::assert_eq;

#[test]
fn test_audit_records_violations() {
    let before = audit();
    assert!(before.is_clean());

    let object_bytes = Buffer::new(Host::Object, vec![0u8; 16]);
    assert!(!object_bytes.free(Host::Array));
    assert!(!object_bytes.is_freed());

    assert!(object_bytes.free(Host::Object));
    assert!(!object_bytes.free(Host::Object));
    object_bytes.read(|bytes| assert!(bytes.is_empty()));

    let after = audit();
    assert_eq!(after.foreign_frees, 1);
    assert_eq!(after.double_frees, 1);
    assert_eq!(after.stale_accesses, 1);
    assert!(!after.is_clean());
    assert_eq!(after.to_string(), "foreign_frees=1, double_frees=1, stale_accesses=1");
}
