//! Device type catalog
//!
//! Labels are never stored separately: the catalog is recomputed from the
//! live resource collection every time it is asked for.

use quickreserve_api::{DeviceTypeGroup, Resource, OTHER_DEVICE_TYPE};
use std::collections::BTreeSet;

/// The label a stored device type is filed under.
///
/// Missing and empty labels fold to "Other"; anything else is used verbatim.
pub fn normalize_device_type(device_type: Option<&str>) -> &str {
    match device_type {
        None | Some("") => OTHER_DEVICE_TYPE,
        Some(label) => label,
    }
}

/// Whether a resource belongs to the requested device type.
///
/// A request for "Other" also picks up unlabelled resources. Labels never
/// match each other across case or whitespace differences.
pub fn matches_device_type(resource: &Resource, requested: &str) -> bool {
    normalize_device_type(resource.device_type.as_deref()) == requested
}

/// Distinct non-blank labels across `resources`, sorted by ordinal comparison
pub fn list_types(resources: &[Resource]) -> Vec<String> {
    resources
        .iter()
        .filter_map(|r| r.device_type.as_deref())
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// Append `candidate` unless an identical label is already present
pub fn add_type(mut existing: Vec<String>, candidate: &str) -> Vec<String> {
    if !existing.iter().any(|label| label == candidate) {
        existing.push(candidate.to_owned());
    }
    existing
}

/// Bucket resources by normalized label.
///
/// Buckets appear in the order their label is first seen; each bucket keeps
/// the input order of its resources.
pub fn group_by_device_type(resources: &[Resource]) -> Vec<DeviceTypeGroup> {
    let mut groups: Vec<DeviceTypeGroup> = Vec::new();

    for resource in resources {
        let label = normalize_device_type(resource.device_type.as_deref());
        match groups.iter_mut().find(|g| g.device_type == label) {
            Some(group) => group.resource_ids.push(resource.id),
            None => groups.push(DeviceTypeGroup {
                device_type: label.to_owned(),
                resource_ids: vec![resource.id],
            }),
        }
    }

    groups
}
