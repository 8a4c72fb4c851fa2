//! Ingress class filtering
//!
//! Decides which Ingress objects belong to this controller.

use k8s_openapi::api::networking::v1::Ingress;

/// Legacy annotation naming the ingress class
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Ingress class policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressClassFilter {
    class_name: String,
    watch_without_class: bool,
}

impl IngressClassFilter {
    pub fn new(class_name: impl Into<String>, watch_without_class: bool) -> Self {
        Self {
            class_name: class_name.into(),
            watch_without_class,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Check if an Ingress is handled by this controller
    ///
    /// `spec.ingressClassName` wins over the legacy annotation. Ingresses
    /// naming no class at all are accepted only when configured to.
    pub fn is_valid(&self, ingress: &Ingress) -> bool {
        let spec_class = ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.ingress_class_name.as_deref());
        let annotation_class = ingress
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(INGRESS_CLASS_ANNOTATION))
            .map(String::as_str);

        match spec_class.or(annotation_class) {
            Some(class) => class == self.class_name,
            None => self.watch_without_class,
        }
    }
}
