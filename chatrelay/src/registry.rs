use crate::types::{Mode, ProviderDescriptor};

/// Append-only list of provider descriptors.
///
/// Registration happens once at startup; afterwards the registry is shared
/// read-only (typically behind an `Arc`). Duplicate names are not rejected,
/// entries with the same name simply coexist.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    descriptors: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ProviderDescriptor) {
        tracing::debug!(
            provider = %descriptor.name,
            priority = descriptor.priority,
            modes = ?descriptor.modes,
            "registered provider"
        );
        self.descriptors.push(descriptor);
    }

    /// All descriptors, ascending by priority. Ties keep registration order.
    pub fn list_all(&self) -> Vec<ProviderDescriptor> {
        let mut all = self.descriptors.clone();
        all.sort_by_key(|d| d.priority);
        all
    }

    pub fn list_for_mode(&self, mode: Mode) -> Vec<ProviderDescriptor> {
        self.list_all()
            .into_iter()
            .filter(|d| d.supports(mode))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl FromIterator<ProviderDescriptor> for ProviderRegistry {
    fn from_iter<I: IntoIterator<Item = ProviderDescriptor>>(iter: I) -> Self {
        let mut registry = Self::new();
        for d in iter {
            registry.register(d);
        }
        registry
    }
}
