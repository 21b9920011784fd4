//! Labels linking derived resources back to their ApiExposure

use crate::ApiExposure;
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Value of the `createdBy` label on every derived resource
pub const CREATED_BY: &str = "api-controller";

/// Label keys
pub const LABEL_CREATED_BY: &str = "createdBy";
pub const LABEL_API_UID: &str = "apiUid";
pub const LABEL_API_NAMESPACE: &str = "apiNamespace";
pub const LABEL_API_NAME: &str = "apiName";

/// Labels stamped on every resource derived from `exposure`.
pub fn owner_labels(exposure: &ApiExposure) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_CREATED_BY.to_string(), CREATED_BY.to_string());
    labels.insert(LABEL_API_UID.to_string(), exposure.uid().unwrap_or_default());
    labels.insert(
        LABEL_API_NAMESPACE.to_string(),
        exposure.namespace().unwrap_or_default(),
    );
    labels.insert(LABEL_API_NAME.to_string(), exposure.name_any());
    labels
}

/// Whether `labels` mark an object as derived from the exposure with `uid`.
pub fn is_owned_by(labels: &BTreeMap<String, String>, uid: &str) -> bool {
    labels.get(LABEL_CREATED_BY).map(String::as_str) == Some(CREATED_BY)
        && labels.get(LABEL_API_UID).map(String::as_str) == Some(uid)
}
