//! # Deployments
//!
//! A [`Deployment`] ties the configured sources to the engine. For every
//! environment it:
//!
//! 1. converges the environment's working tree,
//! 2. evaluates its Puppetfile,
//! 3. resolves every module (all of them, even after failures),
//! 4. synchronizes the modules on the worker pool,
//! 5. purges undeclared modules and, if configured, untracked files,
//! 6. writes the deploy manifest.
//!
//! Environments fail independently. After all of them ran, environment
//! directories that no source produces are removed from each basedir and
//! the failures, if any, are returned together as [`Error::DeployFailed`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::cache::CacheRegistry;
use crate::config::{PurgeLevel, Settings};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::forge::{client_for, ForgeClient, ForgeResolver};
use crate::module::{Module, ModuleContext};
use crate::puppetfile::Puppetfile;
use crate::purge::Purger;
use crate::repository::RepoStatus;
use crate::resolution::{resolve_modules, ResolvedEnvironment, ResolvedModule};
use crate::source::{EnvironmentSpec, Source};
use crate::synchronizer::Synchronizer;
use crate::vcs::{GitProvider, Vcs};

/// Knobs of a single deploy run.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Only these environments; empty means all of them
    pub environments: Vec<String>,
    /// Also deploy modules of environments that already existed
    pub modules: bool,
    /// Overwrite local modifications
    pub force: bool,
    /// Overrides the configured pool size
    pub pool_size: Option<usize>,
    /// Last fallback for modules tracking the environment branch
    pub default_branch_override: Option<String>,
}

/// What happened to one environment.
#[derive(Debug, Clone)]
pub struct EnvironmentReport {
    pub name: String,
    /// The environment's own tree changed
    pub changed: bool,
    pub updated_modules: BTreeSet<String>,
    pub purged: Vec<PathBuf>,
    pub manifest: ResolvedEnvironment,
}

#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    pub environments: Vec<EnvironmentReport>,
    /// Stale environment directories removed from the basedirs
    pub purged_environments: Vec<PathBuf>,
}

/// A source and the environments it lists, for display.
#[derive(Debug, Clone)]
pub struct SourceListing {
    pub name: String,
    pub basedir: PathBuf,
    pub environments: Vec<EnvironmentListing>,
}

#[derive(Debug, Clone)]
pub struct EnvironmentListing {
    pub name: String,
    pub reference: String,
    /// Filled only for detailed listings
    pub modules: Vec<ResolvedModule>,
}

#[derive(Debug)]
pub struct Deployment {
    settings: Settings,
    caches: Arc<CacheRegistry>,
    forge: Option<Arc<dyn ForgeClient>>,
}

impl Deployment {
    /// Deployment using the git backend named in the settings.
    pub fn new(settings: Settings) -> Self {
        let vcs = GitProvider::handle(settings.git.provider);
        Self::with_vcs(settings, vcs)
    }

    pub fn with_vcs(settings: Settings, vcs: Arc<dyn Vcs>) -> Self {
        let caches = Arc::new(CacheRegistry::new(settings.cache_root(), vcs));
        Self {
            settings,
            caches,
            forge: None,
        }
    }

    /// Use `client` instead of the Forge named in settings or Puppetfiles.
    pub fn with_forge_client(mut self, client: Arc<dyn ForgeClient>) -> Self {
        self.forge = Some(client);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    pub fn sources(&self) -> Vec<Source> {
        self.settings
            .sources
            .iter()
            .map(|(name, settings)| Source::new(name, settings.clone(), &self.settings.git.default_ref))
            .collect()
    }

    /// Every environment of every source, in source order.
    pub fn environments(&self) -> Result<Vec<EnvironmentSpec>> {
        let mut all = Vec::new();
        for source in self.sources() {
            all.extend(source.environments(&self.caches)?);
        }
        Ok(all)
    }

    fn forge_client(&self, puppetfile: &Puppetfile) -> Result<Arc<dyn ForgeClient>> {
        if let Some(client) = &self.forge {
            return Ok(Arc::clone(client));
        }
        let url = self
            .settings
            .forge
            .baseurl
            .as_deref()
            .unwrap_or(&puppetfile.forge);
        client_for(url)
    }

    /// Module context for one Puppetfile.
    pub fn module_context(
        &self,
        puppetfile: &Puppetfile,
        environment_branch: Option<&str>,
        options: &DeployOptions,
    ) -> Result<ModuleContext> {
        let forge = ForgeResolver::new(self.forge_client(puppetfile)?);
        let mut ctx = ModuleContext::shared(Arc::clone(&self.caches), forge)
            .with_default_ref(&self.settings.git.default_ref)
            .with_default_branch_override(options.default_branch_override.clone());
        if let Some(branch) = environment_branch {
            ctx = ctx.with_environment_branch(branch);
        }
        Ok(ctx)
    }

    fn synchronizer(&self, options: &DeployOptions) -> Synchronizer {
        Synchronizer::new(options.pool_size.unwrap_or(self.settings.pool_size)).force(options.force)
    }

    fn select(all: &[EnvironmentSpec], options: &DeployOptions) -> Vec<EnvironmentSpec> {
        for wanted in &options.environments {
            if !all.iter().any(|e| &e.name == wanted) {
                warn!("Environment {} not found in any source", wanted);
            }
        }
        all.iter()
            .filter(|e| options.environments.is_empty() || options.environments.contains(&e.name))
            .cloned()
            .collect()
    }

    pub fn deploy(&self, options: &DeployOptions) -> Result<DeployReport> {
        self.deploy_with_progress(options, &|_| {})
    }

    /// Deploy, calling `progress` with each environment name before it
    /// starts.
    pub fn deploy_with_progress(
        &self,
        options: &DeployOptions,
        progress: &dyn Fn(&str),
    ) -> Result<DeployReport> {
        let all = self.environments()?;
        let selected = Self::select(&all, options);
        let mut report = DeployReport::default();
        let mut failures = Vec::new();

        for spec in selected {
            progress(&spec.name);
            let name = spec.name.clone();
            let outcome = Environment::new(spec, &self.caches)
                .and_then(|env| self.deploy_environment(&env, options));
            match outcome {
                Ok(env_report) => report.environments.push(env_report),
                Err(e) => {
                    error!("Failed to deploy environment {}: {}", name, e);
                    failures.push((name, e.to_string()));
                }
            }
        }

        if self.settings.deploy.purges(PurgeLevel::Deployment) {
            report.purged_environments = self.purge_environments(&all)?;
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(Error::DeployFailed { failures })
        }
    }

    /// Deploy one environment. Modules are deployed when asked for, and
    /// always for an environment that did not exist before.
    pub fn deploy_environment(
        &self,
        env: &Environment,
        options: &DeployOptions,
    ) -> Result<EnvironmentReport> {
        info!("Deploying environment {}", env.path().display());
        let mut record = ResolvedEnvironment::new(env.name(), env.spec().source.clone());

        let fresh = env.status()? == RepoStatus::Absent;
        let changed = env.sync(options.force)?;
        record.resolved_base_version = env.head()?;

        let puppetfile = env.puppetfile()?;
        let ctx = self.module_context(&puppetfile, Some(&env.spec().reference), options)?;
        let modules = env.modules(&puppetfile, &ctx)?;

        let mut updated_modules = BTreeSet::new();
        let mut purged = Vec::new();
        if options.modules || fresh {
            record.modules = resolve_modules(&modules)?;
            updated_modules = self.synchronizer(options).sync_all(&modules)?;
            refresh_deployed(&mut record.modules, &modules);

            if self.settings.deploy.purges(PurgeLevel::Puppetfile) {
                purged.extend(env.purge_puppetfile(&puppetfile)?);
            }
            if self.settings.deploy.purges(PurgeLevel::Environment) {
                let allowlist = &self.settings.deploy.purge_allowlist;
                purged.extend(
                    env.purge_untracked(&puppetfile, allowlist)?
                        .into_iter()
                        .map(|p| env.path().join(p)),
                );
            }
        } else {
            debug!("Skipping modules of {}", env.name());
            record.modules = modules
                .iter()
                .map(|m| ResolvedModule::new(m.spec(), None, m.deployed_version()))
                .collect();
        }

        record.finish(true);
        if self.settings.deploy.write_manifest {
            record.write(&env.manifest_path())?;
        }
        Ok(EnvironmentReport {
            name: env.name().to_string(),
            changed,
            updated_modules,
            purged,
            manifest: record,
        })
    }

    /// Synchronize the named modules in every selected environment that is
    /// already deployed. Returns `environment/module` for each change.
    pub fn deploy_modules(&self, names: &[String], options: &DeployOptions) -> Result<BTreeSet<String>> {
        let mut updated = BTreeSet::new();
        let mut failures = Vec::new();
        let mut matched = false;

        for spec in Self::select(&self.environments()?, options) {
            let name = spec.name.clone();
            let env = Environment::new(spec, &self.caches)?;
            if !env.path().is_dir() {
                debug!("Environment {} is not deployed", name);
                continue;
            }
            let outcome = env.puppetfile().and_then(|puppetfile| {
                let ctx = self.module_context(&puppetfile, Some(&env.spec().reference), options)?;
                let modules: Vec<Module> = puppetfile
                    .modules
                    .iter()
                    .filter(|m| names.iter().any(|n| n == &m.name || n == &m.title))
                    .map(|m| Module::build(m, &ctx))
                    .collect::<Result<_>>()?;
                if !modules.is_empty() {
                    matched = true;
                }
                self.synchronizer(options).sync_all(&modules)
            });
            match outcome {
                Ok(changed) => {
                    updated.extend(changed.into_iter().map(|m| format!("{}/{}", name, m)));
                }
                Err(e) => {
                    error!("Failed to deploy modules in {}: {}", name, e);
                    failures.push((name, e.to_string()));
                }
            }
        }

        if !matched && failures.is_empty() {
            warn!("No deployed environment declares {}", names.join(", "));
        }
        if failures.is_empty() {
            Ok(updated)
        } else {
            Err(Error::DeployFailed { failures })
        }
    }

    /// Remove environment directories no source produces.
    pub fn purge_environments(&self, environments: &[EnvironmentSpec]) -> Result<Vec<PathBuf>> {
        let basedirs: BTreeSet<PathBuf> = self
            .sources()
            .iter()
            .map(Source::basedir)
            .collect::<Result<_>>()?;
        let removed = Purger::new(basedirs)
            .desired(environments.iter().map(EnvironmentSpec::path))
            .purge()?;
        for path in &removed {
            info!("Removed stale environment {}", path.display());
        }
        Ok(removed)
    }

    /// Sources and their environments. With `detail`, each environment's
    /// Puppetfile is evaluated and its modules listed.
    pub fn display(&self, detail: bool) -> Result<Vec<SourceListing>> {
        let mut listings = Vec::new();
        for source in self.sources() {
            let mut environments = Vec::new();
            for spec in source.environments(&self.caches)? {
                let name = spec.name.clone();
                let reference = spec.reference.clone();
                let modules = if detail {
                    let env = Environment::new(spec, &self.caches)?;
                    env.puppetfile()?
                        .modules
                        .iter()
                        .map(|m| ResolvedModule::new(m, None, None))
                        .collect()
                } else {
                    Vec::new()
                };
                environments.push(EnvironmentListing {
                    name,
                    reference,
                    modules,
                });
            }
            listings.push(SourceListing {
                name: source.name().to_string(),
                basedir: source.basedir()?,
                environments,
            });
        }
        Ok(listings)
    }

    /// Evaluate a standalone Puppetfile. The environment root is the
    /// Puppetfile's directory.
    pub fn load_puppetfile(path: &Path, moduledir: Option<&Path>) -> Result<Puppetfile> {
        let basedir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let basedir = std::path::absolute(&basedir)?;
        let path = basedir.join(path.file_name().unwrap_or_default());
        match moduledir {
            Some(dir) => Puppetfile::load_with_moduledir(&path, &basedir, dir),
            None => Puppetfile::load(&path, &basedir),
        }
    }

    /// Install the modules of a standalone Puppetfile and purge undeclared
    /// ones when the puppetfile purge level is enabled.
    pub fn install_puppetfile(
        &self,
        puppetfile: &Puppetfile,
        options: &DeployOptions,
    ) -> Result<BTreeSet<String>> {
        let ctx = self.module_context(puppetfile, None, options)?;
        let modules: Vec<Module> = puppetfile
            .modules
            .iter()
            .map(|m| Module::build(m, &ctx))
            .collect::<Result<_>>()?;
        resolve_modules(&modules)?;
        let updated = self.synchronizer(options).sync_all(&modules)?;
        if self.settings.deploy.purges(PurgeLevel::Puppetfile) {
            purge_puppetfile(puppetfile)?;
        }
        Ok(updated)
    }
}

/// Remove undeclared modules from a Puppetfile's managed directories.
pub fn purge_puppetfile(puppetfile: &Puppetfile) -> Result<Vec<PathBuf>> {
    Purger::new(puppetfile.managed_directories.iter().cloned())
        .desired(puppetfile.desired_contents.iter().cloned())
        .purge()
}

fn refresh_deployed(records: &mut [ResolvedModule], modules: &[Module]) {
    for (record, module) in records.iter_mut().zip(modules) {
        record.deployed_version = module.deployed_version();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::build_tar_gz;
    use crate::defaults::{DEPLOY_MANIFEST, PUPPETFILE_NAME};
    use crate::forge::resolver::tests::CountingForge;
    use crate::vcs::fake::FakeVcs;
    use std::fs;
    use tempfile::TempDir;

    const CONTROL: &str = "https://git.example.com/puppet/control.git";
    const NTP: &str = "https://git.example.com/modules/ntp.git";
    const PROD: &str = "1111111111111111111111111111111111111111";
    const DEV: &str = "2222222222222222222222222222222222222222";
    const NTP_SHA: &str = "3333333333333333333333333333333333333333";

    struct Fixture {
        temp: TempDir,
        fake: Arc<FakeVcs>,
        forge: Arc<CountingForge>,
    }

    impl Fixture {
        fn new() -> Self {
            let fake = Arc::new(FakeVcs::new());
            fake.add_branch(CONTROL, "production", PROD);
            fake.add_branch(CONTROL, "dev-branch", DEV);
            fake.add_file(
                CONTROL,
                PROD,
                PUPPETFILE_NAME,
                &format!(
                    "mod 'acme/stdlib', '1.2.0'\nmod 'ntp', :git => '{}', :tag => 'v2.0.0'\n",
                    NTP
                ),
            );
            fake.add_tag(NTP, "v2.0.0", NTP_SHA);

            let forge = Arc::new(CountingForge::default());
            let metadata = r#"{"name": "acme-stdlib", "version": "1.2.0"}"#;
            forge.add(
                "acme-stdlib",
                "1.2.0",
                Some(build_tar_gz(&[
                    ("acme-stdlib-1.2.0/metadata.json", metadata),
                    ("acme-stdlib-1.2.0/manifests/init.pp", "class stdlib {}"),
                ])),
            );
            Self {
                temp: TempDir::new().unwrap(),
                fake,
                forge,
            }
        }

        fn basedir(&self) -> PathBuf {
            self.temp.path().join("environments")
        }

        fn deployment(&self, extra: &str) -> Deployment {
            let yaml = format!(
                "cachedir: {}\nsources:\n  main:\n    remote: {}\n    basedir: {}\n{}",
                self.temp.path().join("cache").display(),
                CONTROL,
                self.basedir().display(),
                extra
            );
            let settings = Settings::parse(&yaml).unwrap();
            let client: Arc<dyn ForgeClient> = self.forge.clone();
            Deployment::with_vcs(settings, self.fake.clone()).with_forge_client(client)
        }
    }

    fn only(name: &str) -> DeployOptions {
        DeployOptions {
            environments: vec![name.to_string()],
            ..DeployOptions::default()
        }
    }

    #[test]
    fn test_fresh_environment_gets_modules_and_manifest() {
        let fx = Fixture::new();
        let deployment = fx.deployment("");
        let report = deployment.deploy(&only("production")).unwrap();

        assert_eq!(report.environments.len(), 1);
        let env = &report.environments[0];
        assert!(env.changed);
        assert_eq!(
            env.updated_modules,
            BTreeSet::from(["ntp".to_string(), "stdlib".to_string()])
        );
        assert!(env.manifest.deploy_success);
        assert_eq!(env.manifest.resolved_base_version.as_deref(), Some(PROD));

        let root = fx.basedir().join("production");
        assert!(root.join("modules/stdlib/manifests/init.pp").is_file());
        assert_eq!(fx.fake.head_of(&root.join("modules/ntp")).as_deref(), Some(NTP_SHA));

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(root.join(DEPLOY_MANIFEST)).unwrap()).unwrap();
        assert_eq!(manifest["environment"], "production");
        assert_eq!(manifest["modules"][0]["resolved_version"], "1.2.0");
        assert_eq!(manifest["modules"][0]["deployed_version"], "1.2.0");
        assert_eq!(manifest["modules"][1]["resolved_version"], NTP_SHA);
    }

    #[test]
    fn test_redeploy_without_modules_leaves_them_alone() {
        let fx = Fixture::new();
        let deployment = fx.deployment("");
        deployment.deploy(&only("production")).unwrap();
        let calls = fx.forge.release_calls.load(std::sync::atomic::Ordering::SeqCst);

        let report = deployment.deploy(&only("production")).unwrap();
        let env = &report.environments[0];
        assert!(!env.changed);
        assert!(env.updated_modules.is_empty());
        // Modules are recorded as deployed but not re-resolved
        assert_eq!(env.manifest.modules.len(), 2);
        assert!(!env.manifest.is_fully_resolved());
        assert_eq!(
            env.manifest.modules[0].deployed_version.as_deref(),
            Some("1.2.0")
        );
        assert_eq!(
            fx.forge.release_calls.load(std::sync::atomic::Ordering::SeqCst),
            calls
        );
    }

    #[test]
    fn test_redeploy_with_modules_is_idempotent() {
        let fx = Fixture::new();
        let deployment = fx.deployment("");
        let options = DeployOptions {
            modules: true,
            ..only("production")
        };
        deployment.deploy(&options).unwrap();
        let report = deployment.deploy(&options).unwrap();
        assert!(report.environments[0].updated_modules.is_empty());
        assert_eq!(report.environments[0].manifest.modules.len(), 2);
    }

    #[test]
    fn test_puppetfile_purge_removes_undeclared_module() {
        let fx = Fixture::new();
        let deployment = fx.deployment("");
        let stale = fx.basedir().join("production/modules/stale");
        deployment.deploy(&only("production")).unwrap();
        fs::create_dir_all(&stale).unwrap();

        let report = deployment
            .deploy(&DeployOptions {
                modules: true,
                ..only("production")
            })
            .unwrap();
        assert_eq!(report.environments[0].purged, vec![stale.clone()]);
        assert!(!stale.exists());
    }

    #[test]
    fn test_stale_environments_are_purged() {
        let fx = Fixture::new();
        let deployment = fx.deployment("");
        let stale = fx.basedir().join("retired");
        fs::create_dir_all(&stale).unwrap();

        let report = deployment.deploy(&only("production")).unwrap();
        assert_eq!(report.purged_environments, vec![stale.clone()]);
        assert!(!stale.exists());
        assert!(fx.basedir().join("production").is_dir());
    }

    #[test]
    fn test_deployment_purge_can_be_disabled() {
        let fx = Fixture::new();
        let deployment = fx.deployment("deploy:\n  purge_levels: [puppetfile]\n");
        let stale = fx.basedir().join("retired");
        fs::create_dir_all(&stale).unwrap();
        deployment.deploy(&only("production")).unwrap();
        assert!(stale.exists());
    }

    #[test]
    fn test_failing_environment_does_not_stop_others() {
        let fx = Fixture::new();
        fx.fake.add_file(
            CONTROL,
            DEV,
            PUPPETFILE_NAME,
            "mod 'acme/missing', '9.9.9'\n",
        );
        let deployment = fx.deployment("    invalid_branches: correct\n");
        let err = deployment.deploy(&DeployOptions::default()).unwrap_err();

        let Error::DeployFailed { failures } = err else {
            panic!("expected a deploy failure");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "dev_branch");
        assert!(failures[0].1.contains("missing"));
        assert!(fx.basedir().join("production/modules/stdlib").is_dir());
        assert!(!fx.basedir().join("dev_branch").join(DEPLOY_MANIFEST).exists());
    }

    #[test]
    fn test_deploy_modules_targets_named_modules() {
        let fx = Fixture::new();
        let deployment = fx.deployment("");
        deployment.deploy(&only("production")).unwrap();
        fs::remove_dir_all(fx.basedir().join("production/modules/stdlib")).unwrap();

        let updated = deployment
            .deploy_modules(&["stdlib".to_string()], &DeployOptions::default())
            .unwrap();
        assert_eq!(updated, BTreeSet::from(["production/stdlib".to_string()]));
        assert!(fx.basedir().join("production/modules/stdlib").is_dir());
    }

    #[test]
    fn test_display_lists_sources_and_modules() {
        let fx = Fixture::new();
        let listings = fx
            .deployment("    ignore_branch_prefixes: [dev]\n")
            .display(true)
            .unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].name, "main");
        assert_eq!(listings[0].environments.len(), 1);
        let production = &listings[0].environments[0];
        assert_eq!(production.name, "production");
        let names: Vec<&str> = production.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["stdlib", "ntp"]);
    }

    #[test]
    fn test_standalone_puppetfile_install() {
        let fx = Fixture::new();
        let dir = fx.temp.path().join("standalone");
        fs::create_dir_all(dir.join("modules/undeclared")).unwrap();
        fs::write(dir.join(PUPPETFILE_NAME), "mod 'acme/stdlib', '1.2.0'\n").unwrap();

        let puppetfile = Deployment::load_puppetfile(&dir.join(PUPPETFILE_NAME), None).unwrap();
        let updated = fx
            .deployment("")
            .install_puppetfile(&puppetfile, &DeployOptions::default())
            .unwrap();
        assert_eq!(updated, BTreeSet::from(["stdlib".to_string()]));
        assert!(dir.join("modules/stdlib/metadata.json").is_file());
        assert!(!dir.join("modules/undeclared").exists());
    }
}
