use crate::error::{AppError, Result};
use crate::models::{ConfigurationBundle, VersionType};
use crate::repository::ConfigurationRepository;
use semver::Version;

/// Resolves the ordered chain of configuration bundles that upgrades
/// `source_version` to `target_version`.
///
/// Active bundles form a graph where every patch is an edge from its
/// `base_version` to its own version. Resolution walks edges strictly
/// increasing toward the target; when the source itself is a baseline its
/// bundle anchors the chain, otherwise the chain starts at the first patch
/// past the source. Every bundle on the path is checksum-verified before it
/// is admitted.
#[derive(Clone)]
pub struct VersionChainResolver {
    config_repo: ConfigurationRepository,
}

impl VersionChainResolver {
    pub fn new(config_repo: ConfigurationRepository) -> Self {
        Self { config_repo }
    }

    pub async fn resolve(
        &self,
        source_version: &str,
        target_version: &str,
    ) -> Result<Vec<ConfigurationBundle>> {
        let source = parse_version(source_version)?;
        let target = parse_version(target_version)?;

        // Upgrade-only: downgrades and no-ops have no path by definition.
        if target <= source {
            return Err(AppError::NoUpgradePath {
                from_version: source_version.to_string(),
                to_version: target_version.to_string(),
            });
        }

        let active = self.config_repo.list_active().await?;
        let mut chain = Vec::new();

        if let Some(bundle) = active.iter().find(|b| b.version == source_version) {
            if bundle.version_type == VersionType::Baseline {
                self.admit(bundle, &mut chain).await?;
            }
        }

        let mut current = source;
        let mut current_str = source_version.to_string();

        while current < target {
            let mut candidates = Vec::new();
            for bundle in &active {
                if bundle.version_type != VersionType::Patch {
                    continue;
                }
                if bundle.base_version.as_deref() != Some(current_str.as_str()) {
                    continue;
                }
                let version = parse_version(&bundle.version)?;
                if version > current && version <= target {
                    candidates.push((version, bundle));
                }
            }

            // More than one outgoing edge cannot happen when the
            // baseline/patch invariants hold; treat it as a data fault.
            if candidates.len() > 1 {
                return Err(AppError::AmbiguousPath(current_str));
            }

            let Some((version, bundle)) = candidates.pop() else {
                return Err(AppError::NoUpgradePath {
                    from_version: source_version.to_string(),
                    to_version: target_version.to_string(),
                });
            };

            self.admit(bundle, &mut chain).await?;
            current = version;
            current_str = bundle.version.clone();
        }

        // The walk must land exactly on the target, never overshoot it.
        if current != target {
            return Err(AppError::NoUpgradePath {
                from_version: source_version.to_string(),
                to_version: target_version.to_string(),
            });
        }

        Ok(chain)
    }

    async fn admit(
        &self,
        bundle: &ConfigurationBundle,
        chain: &mut Vec<ConfigurationBundle>,
    ) -> Result<()> {
        if !self.config_repo.verify_integrity(bundle).await? {
            return Err(AppError::IntegrityViolation(bundle.version.clone()));
        }
        chain.push(bundle.clone());
        Ok(())
    }
}

/// Versions in bundle metadata are short forms like `1.0`; pad them to full
/// semver before comparing.
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidVersion(raw.to_string()));
    }

    let dots = trimmed.chars().filter(|c| *c == '.').count();
    let padded = match dots {
        0 => format!("{}.0.0", trimmed),
        1 => format!("{}.0", trimmed),
        _ => trimmed.to_string(),
    };

    Version::parse(&padded).map_err(|_| AppError::InvalidVersion(raw.to_string()))
}
