use crate::config::{ModelCatalog, ProviderConfig, ProviderFile, ProviderKind};

/// One provider entry flattened around a single selected model id.
#[derive(Clone, Debug)]
pub struct ResolvedModel {
    pub provider_name: String,
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model_id: String,
}

#[derive(Clone, Debug)]
pub struct ModelListing {
    pub name: String,
    pub model_id: String,
    pub provider_kind: &'static str,
    pub provider_name: String,
}

pub struct ModelResolver {
    providers: Vec<ProviderConfig>,
    default_model: Option<String>,
}

impl ModelResolver {
    pub fn new(file: ProviderFile) -> Self {
        Self {
            providers: file.providers,
            default_model: file.default_model,
        }
    }

    pub fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    /// Searches providers in declared order and returns the first match.
    /// List catalogs match on the raw name or on equal normalized forms;
    /// alias catalogs match on the exact alias key only, since aliases are
    /// user-chosen and never carry a date suffix.
    pub fn resolve(&self, name: &str) -> Option<ResolvedModel> {
        let normalized = normalize_model(name);

        for provider in &self.providers {
            let model_id = match &provider.models {
                ModelCatalog::List(ids) => ids
                    .iter()
                    .find(|id| id.as_str() == name || normalize_model(id) == normalized)
                    .cloned(),
                ModelCatalog::Aliased(aliases) => aliases.get(name).cloned(),
            };

            if let Some(model_id) = model_id {
                return Some(ResolvedModel {
                    provider_name: provider.name.clone(),
                    kind: provider.kind,
                    base_url: provider.base_url.clone(),
                    api_key: provider.api_key.clone(),
                    model_id,
                });
            }
        }

        None
    }

    pub fn list_all(&self) -> Vec<ModelListing> {
        let mut listings = Vec::new();

        for provider in &self.providers {
            match &provider.models {
                ModelCatalog::List(ids) => {
                    for id in ids {
                        listings.push(ModelListing {
                            name: id.clone(),
                            model_id: id.clone(),
                            provider_kind: provider.kind.id(),
                            provider_name: provider.name.clone(),
                        });
                    }
                }
                ModelCatalog::Aliased(aliases) => {
                    for (alias, id) in aliases {
                        listings.push(ModelListing {
                            name: alias.clone(),
                            model_id: id.clone(),
                            provider_kind: provider.kind.id(),
                            provider_name: provider.name.clone(),
                        });
                    }
                }
            }
        }

        listings
    }
}

/// Strips trailing `-YYYYMMDD` release-date suffixes from a model name, e.g.
/// `claude-sonnet-4-20250514` -> `claude-sonnet-4`. Suffixes of any other
/// length, or dates embedded mid-string, are left untouched. Stripping
/// repeats until no dated suffix remains, so the function is idempotent.
pub fn normalize_model(name: &str) -> String {
    let mut current = name;
    while let Some(stripped) = strip_date_suffix(current) {
        current = stripped;
    }
    current.to_string()
}

fn strip_date_suffix(name: &str) -> Option<&str> {
    let bytes = name.as_bytes();
    if bytes.len() < 9 {
        return None;
    }

    let cut = bytes.len() - 9;
    if bytes[cut] != b'-' {
        return None;
    }
    if !bytes[cut + 1..].iter().all(u8::is_ascii_digit) {
        return None;
    }

    // The suffix is pure ASCII, so the cut is a valid char boundary.
    Some(&name[..cut])
}
