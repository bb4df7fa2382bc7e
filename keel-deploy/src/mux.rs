//! Composite deployer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use keel_core::Artifact;

use crate::deployer::{DeployResult, Deployer, Labeller};
use crate::error::DeployError;

/// Runs several back ends as one, in configured order.
///
/// Every operation stops at the first failing back end; later back ends
/// are not called and no partial result is returned.
pub struct DeployerMux(Vec<Box<dyn Deployer>>);

impl DeployerMux {
    pub fn new(deployers: Vec<Box<dyn Deployer>>) -> Self {
        Self(deployers)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deployer for DeployerMux {
    fn labels(&self) -> BTreeMap<String, String> {
        self.0.iter().fold(BTreeMap::new(), |mut merged, d| {
            merged.extend(d.labels());
            merged
        })
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>, DeployError> {
        let mut deps = BTreeSet::new();
        for deployer in &self.0 {
            deps.extend(deployer.dependencies()?);
        }
        Ok(deps.into_iter().collect())
    }

    fn render(
        &self,
        artifacts: &[Artifact],
        labellers: &[&dyn Labeller],
    ) -> Result<String, DeployError> {
        let rendered = self
            .0
            .iter()
            .map(|d| d.render(artifacts, labellers))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rendered.join("\n---\n"))
    }

    fn deploy(
        &self,
        artifacts: &[Artifact],
        labellers: &[&dyn Labeller],
    ) -> Result<DeployResult, DeployError> {
        let mut namespaces = BTreeSet::new();
        for deployer in &self.0 {
            let result = deployer.deploy(artifacts, labellers)?;
            namespaces.extend(result.namespaces);
        }
        Ok(DeployResult {
            namespaces: namespaces.into_iter().collect(),
        })
    }

    fn cleanup(&self) -> Result<(), DeployError> {
        for deployer in &self.0 {
            deployer.cleanup()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Default)]
    struct Calls {
        deploy: AtomicUsize,
        cleanup: AtomicUsize,
    }

    struct Fake {
        name: &'static str,
        namespaces: Vec<&'static str>,
        deps: Vec<&'static str>,
        fail: bool,
        calls: Arc<Calls>,
    }

    impl Fake {
        fn ok(name: &'static str, namespaces: Vec<&'static str>, calls: Arc<Calls>) -> Box<Self> {
            Box::new(Self {
                name,
                namespaces,
                deps: Vec::new(),
                fail: false,
                calls,
            })
        }

        fn failing(name: &'static str, calls: Arc<Calls>) -> Box<Self> {
            Box::new(Self {
                name,
                namespaces: Vec::new(),
                deps: Vec::new(),
                fail: true,
                calls,
            })
        }

        fn check(&self) -> Result<(), DeployError> {
            if self.fail {
                return Err(DeployError::Tool(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    impl Deployer for Fake {
        fn labels(&self) -> BTreeMap<String, String> {
            BTreeMap::from([
                ("shared".to_string(), self.name.to_string()),
                (self.name.to_string(), "yes".to_string()),
            ])
        }

        fn dependencies(&self) -> Result<Vec<PathBuf>, DeployError> {
            self.check()?;
            Ok(self.deps.iter().map(PathBuf::from).collect())
        }

        fn render(&self, _: &[Artifact], _: &[&dyn Labeller]) -> Result<String, DeployError> {
            self.check()?;
            Ok(format!("name: {}", self.name))
        }

        fn deploy(&self, _: &[Artifact], _: &[&dyn Labeller]) -> Result<DeployResult, DeployError> {
            self.calls.deploy.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(DeployResult {
                namespaces: self.namespaces.iter().map(|s| s.to_string()).collect(),
            })
        }

        fn cleanup(&self) -> Result<(), DeployError> {
            self.calls.cleanup.fetch_add(1, Ordering::SeqCst);
            self.check()
        }
    }

    #[test]
    fn deploy_unions_namespaces() {
        let calls = Arc::new(Calls::default());
        let mux = DeployerMux::new(vec![
            Fake::ok("a", vec!["ns2", "ns1"], calls.clone()),
            Fake::ok("b", vec!["ns1", "ns3"], calls.clone()),
        ]);
        let result = mux.deploy(&[], &[]).expect("deploy");
        assert_eq!(result.namespaces, vec!["ns1", "ns2", "ns3"]);
        assert_eq!(calls.deploy.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn deploy_stops_at_first_failure() {
        let first = Arc::new(Calls::default());
        let third = Arc::new(Calls::default());
        let mux = DeployerMux::new(vec![
            Fake::ok("a", vec!["ns"], first.clone()),
            Fake::failing("b", Arc::new(Calls::default())),
            Fake::ok("c", vec!["ns"], third.clone()),
        ]);
        let err = mux.deploy(&[], &[]).unwrap_err();
        assert!(err.to_string().contains("b failed"));
        assert_eq!(first.deploy.load(Ordering::SeqCst), 1);
        assert_eq!(third.deploy.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cleanup_stops_at_first_failure() {
        let later = Arc::new(Calls::default());
        let mux = DeployerMux::new(vec![
            Fake::failing("a", Arc::new(Calls::default())),
            Fake::ok("b", vec![], later.clone()),
        ]);
        assert!(mux.cleanup().is_err());
        assert_eq!(later.cleanup.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn render_joins_with_separator() {
        let calls = Arc::new(Calls::default());
        let mux = DeployerMux::new(vec![
            Fake::ok("a", vec![], calls.clone()),
            Fake::ok("b", vec![], calls),
        ]);
        assert_eq!(mux.render(&[], &[]).expect("render"), "name: a\n---\nname: b");
    }

    #[test]
    fn render_failure_returns_no_output() {
        let calls = Arc::new(Calls::default());
        let mux = DeployerMux::new(vec![
            Fake::ok("a", vec![], calls),
            Fake::failing("b", Arc::new(Calls::default())),
        ]);
        assert!(mux.render(&[], &[]).is_err());
    }

    #[test]
    fn labels_later_back_end_wins() {
        let calls = Arc::new(Calls::default());
        let mux = DeployerMux::new(vec![
            Fake::ok("a", vec![], calls.clone()),
            Fake::ok("b", vec![], calls),
        ]);
        let labels = mux.labels();
        assert_eq!(labels["shared"], "b");
        assert_eq!(labels["a"], "yes");
        assert_eq!(labels["b"], "yes");
    }

    #[test]
    fn dependencies_are_sorted_and_deduplicated() {
        let calls = Arc::new(Calls::default());
        let mut a = Fake::ok("a", vec![], calls.clone());
        a.deps = vec!["k8s/web.yaml", "k8s/db.yaml"];
        let mut b = Fake::ok("b", vec![], calls);
        b.deps = vec!["k8s/db.yaml", "extra.yaml"];
        let mux = DeployerMux::new(vec![a, b]);
        assert_eq!(
            mux.dependencies().expect("deps"),
            vec![
                PathBuf::from("extra.yaml"),
                PathBuf::from("k8s/db.yaml"),
                PathBuf::from("k8s/web.yaml"),
            ]
        );
    }

    #[test]
    fn empty_mux_is_a_no_op() {
        let mux = DeployerMux::new(Vec::new());
        assert!(mux.is_empty());
        assert_eq!(mux.deploy(&[], &[]).expect("deploy"), DeployResult::default());
        assert_eq!(mux.render(&[], &[]).expect("render"), "");
    }
}
