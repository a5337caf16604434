//! Tests for strongly typed identifiers

use std::collections::HashSet;

use core_kernel::{BillingRunId, InvoiceId, VendorId};
use uuid::Uuid;

#[test]
fn test_ids_are_unique() {
    let ids: HashSet<_> = (0..100).map(|_| BillingRunId::new()).collect();
    assert_eq!(ids.len(), 100);
}

#[test]
fn test_display_carries_prefix_and_parses_back() {
    let id = VendorId::new();
    let text = id.to_string();
    assert!(text.starts_with(VendorId::prefix()));
    assert_eq!(text.parse::<VendorId>().unwrap(), id);
}

#[test]
fn test_bare_uuid_parses() {
    let uuid = Uuid::new_v4();
    let id: InvoiceId = uuid.to_string().parse().unwrap();
    assert_eq!(id.as_uuid(), &uuid);
    assert_eq!(InvoiceId::from_uuid(uuid), id);
}

#[test]
fn test_serde_round_trip() {
    let id = BillingRunId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(serde_json::from_str::<BillingRunId>(&json).unwrap(), id);
}
