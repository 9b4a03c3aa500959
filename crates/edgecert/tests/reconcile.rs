//! End-to-end reconciliation runs against scripted probes and a recording
//! issuance client.

use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use edgecert::{
    CoverageCheck, IssuanceClient, IssuanceError, IssuanceOptions, IssuanceStatus, Reconciler,
};
use edgecert_config::{ConfigError, ReconcileSettings};

const SERVER_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10));

/// Shared view of the outside world: which domains point here and which
/// are served with a valid certificate.
#[derive(Clone, Default)]
struct World {
    resolving: Arc<Mutex<HashSet<String>>>,
    covered: Arc<Mutex<HashSet<String>>>,
}

impl World {
    fn resolve(&self, domains: &[&str]) {
        let mut resolving = self.resolving.lock().unwrap();
        resolving.extend(domains.iter().map(|d| d.to_string()));
    }

    fn cover(&self, domains: &[&str]) {
        let mut covered = self.covered.lock().unwrap();
        covered.extend(domains.iter().map(|d| d.to_string()));
    }
}

#[async_trait]
impl CoverageCheck for World {
    async fn resolves_to_self(&self, domain: &str) -> bool {
        self.resolving.lock().unwrap().contains(domain)
    }

    async fn serves_valid_cert(&self, domain: &str) -> bool {
        self.covered.lock().unwrap().contains(domain)
    }
}

/// Records every call; successful calls make the domains covered.
#[derive(Clone)]
struct RecordingIssuer {
    world: World,
    calls: Arc<Mutex<Vec<(Vec<String>, IssuanceOptions)>>>,
    failing: Arc<HashSet<String>>,
}

impl RecordingIssuer {
    fn new(world: &World) -> Self {
        Self {
            world: world.clone(),
            calls: Arc::default(),
            failing: Arc::default(),
        }
    }

    fn failing_for(world: &World, domains: &[&str]) -> Self {
        Self {
            failing: Arc::new(domains.iter().map(|d| d.to_string()).collect()),
            ..Self::new(world)
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(domains, _)| domains.clone())
            .collect()
    }
}

#[async_trait]
impl IssuanceClient for RecordingIssuer {
    async fn issue(&self, domains: &[String], options: &IssuanceOptions) -> Result<(), IssuanceError> {
        self.calls
            .lock()
            .unwrap()
            .push((domains.to_vec(), options.clone()));

        if domains.iter().any(|d| self.failing.contains(d)) {
            return Err(IssuanceError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "challenge failed".to_string(),
            });
        }

        self.world
            .covered
            .lock()
            .unwrap()
            .extend(domains.iter().cloned());
        Ok(())
    }
}

struct Edge {
    _dir: TempDir,
    backend_map: PathBuf,
    certs: PathBuf,
    renewal: PathBuf,
}

impl Edge {
    fn new(routes: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let backend_map = dir.path().join("backends.map");
        let certs = dir.path().join("certs");
        let renewal = dir.path().join("renewal");
        fs::write(&backend_map, routes).unwrap();
        fs::create_dir_all(&certs).unwrap();
        fs::create_dir_all(&renewal).unwrap();
        Self {
            _dir: dir,
            backend_map,
            certs,
            renewal,
        }
    }

    fn install_cert(&self, stem: &str, names: &[&str]) -> PathBuf {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        let pem = rcgen::generate_simple_self_signed(names).unwrap().cert.pem();
        let path = self.certs.join(format!("{stem}.pem"));
        fs::write(&path, pem).unwrap();
        fs::write(self.renewal.join(format!("{stem}.conf")), "version = 2.0\n").unwrap();
        path
    }

    fn settings(&self) -> ReconcileSettings {
        let mut settings =
            ReconcileSettings::new(SERVER_IP, &self.backend_map, &self.certs, "ops@example.com");
        settings.renewal_dir = self.renewal.clone();
        settings
    }

    fn reconciler(&self, world: &World, issuer: &RecordingIssuer) -> Reconciler {
        Reconciler::new(self.settings(), world.clone(), issuer.clone())
    }
}

fn exists(path: &Path) -> bool {
    path.exists()
}

#[tokio::test]
async fn test_groups_uncovered_domains_by_backend() {
    let edge = Edge::new("a.example b1\nb.example b1\nc.example b2\n");
    let world = World::default();
    world.resolve(&["a.example", "b.example", "c.example"]);
    world.cover(&["c.example"]);
    let issuer = RecordingIssuer::new(&world);

    let summary = edge.reconciler(&world, &issuer).run().await.unwrap();

    assert_eq!(
        issuer.calls(),
        vec![vec!["a.example".to_string(), "b.example".to_string()]]
    );
    assert_eq!(summary.issuance.len(), 1);
    assert_eq!(summary.issuance[0].backend_id, "b1");
    assert_eq!(summary.issuance[0].status, IssuanceStatus::Issued);

    let calls = issuer.calls.lock().unwrap();
    let (_, options) = &calls[0];
    assert_eq!(options.contact_email, "ops@example.com");
    assert_eq!(options.challenge_port, 8080);
    assert!(!options.staging);
}

#[tokio::test]
async fn test_domains_resolving_elsewhere_are_not_requested() {
    let edge = Edge::new("a.example b1\nb.example b1\n");
    let world = World::default();
    world.resolve(&["a.example"]);
    let issuer = RecordingIssuer::new(&world);

    edge.reconciler(&world, &issuer).run().await.unwrap();

    assert_eq!(issuer.calls(), vec![vec!["a.example".to_string()]]);
}

#[tokio::test]
async fn test_only_routed_domains_reach_the_issuer() {
    let edge = Edge::new("a.example b1\n# unrouted.example b1\n");
    let world = World::default();
    world.resolve(&["a.example", "unrouted.example", "stray.example"]);
    let issuer = RecordingIssuer::new(&world);

    edge.reconciler(&world, &issuer).run().await.unwrap();

    for call in issuer.calls() {
        for domain in call {
            assert_eq!(domain, "a.example");
        }
    }
}

#[tokio::test]
async fn test_orphaned_certificate_is_removed() {
    let edge = Edge::new("a.example b1\n");
    let world = World::default();
    let old = edge.install_cert("old", &["old.example"]);
    let issuer = RecordingIssuer::new(&world);

    let summary = edge.reconciler(&world, &issuer).run().await.unwrap();

    assert!(!exists(&old));
    assert!(!exists(&edge.renewal.join("old.conf")));
    assert!(exists(&edge.renewal.join("old.disabled")));
    assert_eq!(summary.cleanup.removed, vec![old]);
}

#[tokio::test]
async fn test_shared_and_wildcard_certificates_are_kept() {
    let edge = Edge::new("a.example b1\n");
    let world = World::default();
    world.resolve(&["a.example"]);
    world.cover(&["a.example"]);
    let shared = edge.install_cert("shared", &["a.example", "c.example"]);
    let wildcard = edge.install_cert("wildcard", &["*.example.com"]);
    let issuer = RecordingIssuer::new(&world);

    let summary = edge.reconciler(&world, &issuer).run().await.unwrap();

    assert!(exists(&shared));
    assert!(exists(&wildcard));
    assert!(exists(&edge.renewal.join("shared.conf")));
    assert!(exists(&edge.renewal.join("wildcard.conf")));
    assert!(summary.cleanup.removed.is_empty());
}

#[tokio::test]
async fn test_second_run_is_a_noop() {
    let edge = Edge::new("a.example b1\nb.example b2\n");
    let world = World::default();
    world.resolve(&["a.example", "b.example"]);
    edge.install_cert("old", &["old.example"]);
    edge.install_cert("a", &["a.example"]);
    let issuer = RecordingIssuer::new(&world);
    let reconciler = edge.reconciler(&world, &issuer);

    let first = reconciler.run().await.unwrap();
    assert_eq!(issuer.calls().len(), 2);
    assert_eq!(first.cleanup.removed.len(), 1);

    let second = reconciler.run().await.unwrap();
    assert_eq!(issuer.calls().len(), 2);
    assert!(second.issuance.is_empty());
    assert!(second.cleanup.removed.is_empty());
}

#[tokio::test]
async fn test_failed_issuance_does_not_stop_cleanup() {
    let edge = Edge::new("a.example b1\nc.example b2\n");
    let world = World::default();
    world.resolve(&["a.example", "c.example"]);
    let old = edge.install_cert("old", &["old.example"]);
    let issuer = RecordingIssuer::failing_for(&world, &["a.example"]);

    let summary = edge.reconciler(&world, &issuer).run().await.unwrap();

    assert_eq!(issuer.calls().len(), 2);
    assert!(summary.issuance[0].is_failed());
    assert_eq!(summary.issuance[1].status, IssuanceStatus::Issued);
    assert!(!exists(&old));
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let edge = Edge::new("a.example b1\n");
    let world = World::default();
    world.resolve(&["a.example"]);
    let old = edge.install_cert("old", &["old.example"]);
    let issuer = RecordingIssuer::new(&world);

    let mut settings = edge.settings();
    settings.dry_run = true;
    let summary = Reconciler::new(settings, world.clone(), issuer.clone())
        .run()
        .await
        .unwrap();

    assert!(issuer.calls().is_empty());
    assert_eq!(summary.issuance[0].status, IssuanceStatus::Skipped);
    assert!(exists(&old));
    assert!(exists(&edge.renewal.join("old.conf")));
    assert_eq!(summary.cleanup.removed, vec![old]);
}

#[tokio::test]
async fn test_malformed_routing_table_aborts_before_mutation() {
    let edge = Edge::new("a.example b1\nbroken-line\n");
    let world = World::default();
    world.resolve(&["a.example"]);
    let old = edge.install_cert("old", &["old.example"]);
    let issuer = RecordingIssuer::new(&world);

    let err = edge.reconciler(&world, &issuer).run().await.unwrap_err();

    assert!(matches!(err, ConfigError::MalformedRoute { line: 2, .. }));
    assert!(issuer.calls().is_empty());
    assert!(exists(&old));
}

#[tokio::test]
async fn test_missing_routing_table_is_fatal() {
    let edge = Edge::new("");
    fs::remove_file(&edge.backend_map).unwrap();
    let world = World::default();
    let issuer = RecordingIssuer::new(&world);

    let err = edge.reconciler(&world, &issuer).run().await.unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[tokio::test]
async fn test_summary_serializes() {
    let edge = Edge::new("a.example b1\n");
    let world = World::default();
    world.resolve(&["a.example"]);
    let issuer = RecordingIssuer::new(&world);

    let summary = edge.reconciler(&world, &issuer).run().await.unwrap();
    let json = serde_json::to_value(&summary).unwrap();

    assert_eq!(json["domain_count"], 1);
    assert_eq!(json["issuance"][0]["status"], "issued");
    assert_eq!(json["cleanup"]["dry_run"], false);
}
