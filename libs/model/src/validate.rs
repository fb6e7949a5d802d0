//! Document parsing and the validation pass.
//!
//! Parsing happens in two steps. The document is first read as a loose YAML
//! value. The validation pass then walks it section by section, reading each
//! field on its own so a single bad field never hides its siblings, and
//! converts it into a [`DesiredState`], collecting every violation with its
//! field path.

use std::collections::BTreeSet;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{ConfigurationError, Violation};
use crate::types::{
    ComputeFleetSpec, DatabaseSpec, DesiredState, LoadBalancerScope, LoadBalancerSpec,
    ProjectIdentity, RelayFleetSpec, ServiceKind, ServiceSpec, SslPolicy,
};

const PROJECT_FIELDS: &[&str] = &["id", "region", "zone"];
const COMPUTE_FLEET_FIELDS: &[&str] =
    &["instances", "cpu", "memory_mb", "memory", "max_connections"];
const RELAY_FLEET_FIELDS: &[&str] = &["instances", "cpu", "memory_mb", "memory", "ports"];
const LOAD_BALANCER_FIELDS: &[&str] = &["scope", "ssl_policy"];
const DATABASE_FIELDS: &[&str] = &["location"];

/// Memory may be given as a plain number of megabytes or as a quantity
/// string such as `4Gi`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Number(i64),
    Text(String),
}

/// One mapping section of the document, read a field at a time.
struct Section {
    path: String,
    fields: Mapping,
}

impl Section {
    fn at(&self, name: &str) -> String {
        format!("{}.{name}", self.path)
    }
}

/// Parse and validate a YAML (or JSON) desired-state document.
///
/// `document` names the source in error messages.
pub fn parse_document(text: &str, document: &str) -> Result<DesiredState, ConfigurationError> {
    let mut checker = Checker::default();

    let root: Value = match serde_yaml::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            checker.violation("$", format!("malformed document: {e}"));
            return checker.finish(document, None);
        }
    };

    let Value::Mapping(root) = root else {
        checker.violation("$", "document must be a mapping with `project` and `services`");
        return checker.finish(document, None);
    };

    let mut project = None;
    let mut services = Vec::new();
    let mut saw_project = false;

    for (key, value) in root {
        match key.as_str() {
            Some("project") => {
                saw_project = true;
                project = checker.project(value);
            }
            Some("services") => services = checker.services(value),
            Some(other) => checker.violation(other, "unknown field"),
            None => checker.violation("$", "document keys must be strings"),
        }
    }

    if !saw_project {
        checker.violation("project", "is required");
    }

    let state = project.map(|project| {
        services
            .into_iter()
            .fold(DesiredState::new(project), DesiredState::with_service)
    });
    checker.finish(document, state)
}

#[derive(Default)]
struct Checker {
    violations: Vec<Violation>,
}

impl Checker {
    fn violation(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation::new(path, message));
    }

    fn finish(
        self,
        document: &str,
        state: Option<DesiredState>,
    ) -> Result<DesiredState, ConfigurationError> {
        match state {
            Some(state) if self.violations.is_empty() => Ok(state),
            _ => Err(ConfigurationError::Invalid {
                document: document.to_string(),
                violations: self.violations,
            }),
        }
    }

    /// Open a mapping section, recording keys outside `known`.
    fn section(&mut self, path: &str, value: Value, known: &[&str]) -> Option<Section> {
        let fields = match value {
            Value::Mapping(fields) => fields,
            Value::Null => Mapping::new(),
            _ => {
                self.violation(path, "must be a mapping");
                return None;
            }
        };

        for key in fields.keys() {
            match key.as_str() {
                Some(name) if known.contains(&name) => {}
                Some(name) => self.violation(format!("{path}.{name}"), "unknown field"),
                None => self.violation(path, "field names must be strings"),
            }
        }

        Some(Section {
            path: path.to_string(),
            fields,
        })
    }

    /// Read one field of `section`.
    ///
    /// An absent or null field is `Some(None)`. A field of the wrong type is
    /// recorded and yields `None`.
    fn field<T: DeserializeOwned>(
        &mut self,
        section: &Section,
        name: &str,
    ) -> Option<Option<T>> {
        let value = match section.fields.get(name) {
            None | Some(Value::Null) => return Some(None),
            Some(value) => value.clone(),
        };
        match serde_yaml::from_value(value) {
            Ok(v) => Some(Some(v)),
            Err(e) => {
                self.violation(section.at(name), e.to_string());
                None
            }
        }
    }

    fn project(&mut self, value: Value) -> Option<ProjectIdentity> {
        let section = self.section("project", value, PROJECT_FIELDS)?;
        let id = self.non_empty(&section, "id");
        let region = self.non_empty(&section, "region");
        let zone = self.non_empty(&section, "zone");
        Some(ProjectIdentity {
            id: id?,
            region: region?,
            zone: zone?,
        })
    }

    fn services(&mut self, value: Value) -> Vec<ServiceSpec> {
        let entries = match value {
            Value::Mapping(entries) => entries,
            Value::Null => return Vec::new(),
            _ => {
                self.violation("services", "must be a mapping of service kind to spec");
                return Vec::new();
            }
        };

        let mut specs = Vec::new();
        let mut seen = BTreeSet::new();
        for (key, value) in entries {
            let Some(name) = key.as_str() else {
                self.violation("services", "service kinds must be strings");
                continue;
            };
            let path = format!("services.{name}");
            let kind = match name.parse::<ServiceKind>() {
                Ok(kind) => kind,
                Err(message) => {
                    self.violation(path, message);
                    continue;
                }
            };
            if !seen.insert(kind) {
                self.violation(path, "declared more than once");
                continue;
            }
            if let Some(spec) = self.service(kind, &path, value) {
                specs.push(spec);
            }
        }
        specs
    }

    fn service(&mut self, kind: ServiceKind, path: &str, value: Value) -> Option<ServiceSpec> {
        match kind {
            ServiceKind::ComputeFleet => {
                let section = self.section(path, value, COMPUTE_FLEET_FIELDS)?;
                let instances = self.positive(&section, "instances");
                let cpu = self.positive(&section, "cpu");
                let memory_mb = self.memory(&section);
                let max_connections = self.positive(&section, "max_connections");
                Some(ServiceSpec::ComputeFleet(ComputeFleetSpec {
                    instances: instances?,
                    cpu: cpu?,
                    memory_mb: memory_mb?,
                    max_connections: max_connections?,
                }))
            }
            ServiceKind::RelayFleet => {
                let section = self.section(path, value, RELAY_FLEET_FIELDS)?;
                let instances = self.positive(&section, "instances");
                let cpu = self.positive(&section, "cpu");
                let memory_mb = self.memory(&section);
                let ports = self.ports(&section, "ports");
                Some(ServiceSpec::RelayFleet(RelayFleetSpec {
                    instances: instances?,
                    cpu: cpu?,
                    memory_mb: memory_mb?,
                    ports: ports?,
                }))
            }
            ServiceKind::LoadBalancer => {
                let section = self.section(path, value, LOAD_BALANCER_FIELDS)?;
                let scope = self.enumerated::<LoadBalancerScope>(&section, "scope");
                let ssl_policy = self.enumerated::<SslPolicy>(&section, "ssl_policy");
                Some(ServiceSpec::LoadBalancer(LoadBalancerSpec {
                    scope: scope?,
                    ssl_policy: ssl_policy?,
                }))
            }
            ServiceKind::Database => {
                let section = self.section(path, value, DATABASE_FIELDS)?;
                let location = self.non_empty(&section, "location");
                Some(ServiceSpec::Database(DatabaseSpec { location: location? }))
            }
        }
    }

    /// Read a field that must be present.
    fn required<T: DeserializeOwned>(&mut self, section: &Section, name: &str) -> Option<T> {
        let value = self.field(section, name)?;
        if value.is_none() {
            self.violation(section.at(name), "is required");
        }
        value
    }

    fn non_empty(&mut self, section: &Section, name: &str) -> Option<String> {
        let value: String = self.required(section, name)?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.violation(section.at(name), "must not be empty");
            return None;
        }
        Some(trimmed.to_string())
    }

    fn positive(&mut self, section: &Section, name: &str) -> Option<u32> {
        let value: i64 = self.required(section, name)?;
        self.positive_value(&section.at(name), value)
    }

    fn positive_value(&mut self, path: &str, value: i64) -> Option<u32> {
        if value <= 0 {
            self.violation(path, format!("must be greater than zero (got {value})"));
            return None;
        }
        match u32::try_from(value) {
            Ok(v) => Some(v),
            Err(_) => {
                self.violation(path, format!("must be at most {} (got {value})", u32::MAX));
                None
            }
        }
    }

    /// Memory from either `memory_mb` or `memory`, exactly one of which is set.
    fn memory(&mut self, section: &Section) -> Option<u32> {
        let memory_mb: Option<Option<i64>> = self.field(section, "memory_mb");
        let memory: Option<Option<RawQuantity>> = self.field(section, "memory");
        match (memory_mb?, memory?) {
            (Some(_), Some(_)) => {
                self.violation(
                    section.at("memory"),
                    "set either `memory` or `memory_mb`, not both",
                );
                None
            }
            (Some(mb), None) => self.positive_value(&section.at("memory_mb"), mb),
            (None, Some(RawQuantity::Number(mb))) => {
                self.positive_value(&section.at("memory"), mb)
            }
            (None, Some(RawQuantity::Text(text))) => {
                let path = section.at("memory");
                match parse_memory_quantity(&text) {
                    Ok(mb) => self.positive_value(&path, mb),
                    Err(message) => {
                        self.violation(path, message);
                        None
                    }
                }
            }
            (None, None) => {
                self.violation(section.at("memory_mb"), "is required");
                None
            }
        }
    }

    fn ports(&mut self, section: &Section, name: &str) -> Option<BTreeSet<u16>> {
        let path = section.at(name);
        let ports: Vec<i64> = self.required(section, name)?;
        if ports.is_empty() {
            self.violation(path, "must list at least one port");
            return None;
        }

        let mut out = BTreeSet::new();
        let mut valid = true;
        for (i, port) in ports.into_iter().enumerate() {
            match u16::try_from(port) {
                Ok(p) if p > 0 => {
                    out.insert(p);
                }
                _ => {
                    valid = false;
                    self.violation(
                        format!("{path}[{i}]"),
                        format!("port must be between 1 and 65535 (got {port})"),
                    );
                }
            }
        }
        valid.then_some(out)
    }

    fn enumerated<T>(&mut self, section: &Section, name: &str) -> Option<T>
    where
        T: std::str::FromStr<Err = String>,
    {
        let value: String = self.required(section, name)?;
        match value.trim().parse::<T>() {
            Ok(v) => Some(v),
            Err(message) => {
                self.violation(section.at(name), message);
                None
            }
        }
    }
}

/// Parse a memory quantity (`512Mi`, `4Gi`, `1Ti`, or bare megabytes) into MB.
fn parse_memory_quantity(text: &str) -> Result<i64, String> {
    let text = text.trim();
    let (digits, multiplier) = if let Some(n) = text.strip_suffix("Ti") {
        (n, 1024 * 1024)
    } else if let Some(n) = text.strip_suffix("Gi") {
        (n, 1024)
    } else if let Some(n) = text.strip_suffix("Mi") {
        (n, 1)
    } else {
        (text, 1)
    };

    let amount: i64 = digits.trim().parse().map_err(|_| {
        format!("invalid memory quantity '{text}' (expected e.g. 512Mi, 4Gi or a number of MB)")
    })?;
    amount
        .checked_mul(multiplier)
        .ok_or_else(|| format!("memory quantity '{text}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FULL: &str = r#"
project:
  id: acme
  region: europe-west1
  zone: europe-west1-b
services:
  compute_fleet:
    instances: 3
    cpu: 2
    memory: 4Gi
    max_connections: 500
  relay_fleet:
    instances: 2
    cpu: 1
    memory_mb: 1024
    ports: [3478, 5349, 3478]
  load_balancer:
    scope: regional
    ssl_policy: compatible
  database:
    location: eur3
"#;

    #[test]
    fn test_parse_full_document() {
        let state = parse_document(FULL, "inline").unwrap();

        assert_eq!(state.project.id, "acme");
        assert_eq!(state.services.len(), 4);
        assert_eq!(
            state.get(ServiceKind::ComputeFleet),
            Some(&ServiceSpec::ComputeFleet(ComputeFleetSpec {
                instances: 3,
                cpu: 2,
                memory_mb: 4096,
                max_connections: 500,
            }))
        );
        let Some(ServiceSpec::RelayFleet(relay)) = state.get(ServiceKind::RelayFleet) else {
            panic!("relay fleet missing");
        };
        assert_eq!(relay.ports, BTreeSet::from([3478, 5349]));
    }

    #[test]
    fn test_json_document_is_accepted() {
        let json = r#"{"project": {"id": "p", "region": "r", "zone": "z"},
                       "services": {"database": {"location": "nam5"}}}"#;
        let state = parse_document(json, "inline.json").unwrap();
        assert_eq!(state.services.len(), 1);
        assert!(state.contains(ServiceKind::Database));
    }

    #[test]
    fn test_violations_are_aggregated() {
        let doc = r#"
project: { id: acme, region: r, zone: z }
services:
  compute_fleet: { instances: 0, cpu: 2, memory_mb: 512, max_connections: 10 }
  load_balancer: { scope: global, ssl_policy: ancient }
"#;
        let err = parse_document(doc, "inline").unwrap_err();

        assert_eq!(err.violations().len(), 2, "{err}");
        assert!(err.has_violation_at("services.compute_fleet.instances"));
        assert!(err.has_violation_at("services.load_balancer.ssl_policy"));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let doc = r#"
project: { id: acme, region: r, zone: z }
services:
  cdn: { edge: true }
  database: { location: nam5 }
"#;
        let err = parse_document(doc, "inline").unwrap_err();
        assert!(err.has_violation_at("services.cdn"));
        assert_eq!(err.violations().len(), 1);
    }

    #[rstest]
    #[case::missing_project("services: {}", "project")]
    #[case::unknown_top_level("project: { id: a, region: b, zone: c }\nextra: 1", "extra")]
    #[case::unknown_project_field(
        "project: { id: a, region: b, zone: c, owner: d }",
        "project.owner"
    )]
    #[case::empty_zone("project: { id: a, region: b, zone: '  ' }", "project.zone")]
    #[case::not_a_mapping("- just\n- a list", "$")]
    #[case::syntax("project: [unclosed", "$")]
    fn test_violation_paths(#[case] doc: &str, #[case] path: &str) {
        let err = parse_document(doc, "inline").unwrap_err();
        assert!(
            err.has_violation_at(path),
            "expected violation at {path}, got: {:?}",
            err.violations()
        );
    }

    fn with_service(service: &str) -> String {
        format!("project: {{ id: a, region: b, zone: c }}\nservices:\n  {service}")
    }

    #[rstest]
    #[case::unknown_field("database: { location: x, tier: gold }", "services.database.tier")]
    #[case::not_a_mapping("database: nam5", "services.database")]
    #[case::bad_port(
        "relay_fleet: { instances: 1, cpu: 1, memory_mb: 1, ports: [80, 70000] }",
        "services.relay_fleet.ports[1]"
    )]
    #[case::no_ports(
        "relay_fleet: { instances: 1, cpu: 1, memory_mb: 1, ports: [] }",
        "services.relay_fleet.ports"
    )]
    #[case::missing_memory(
        "compute_fleet: { instances: 1, cpu: 1, max_connections: 1 }",
        "services.compute_fleet.memory_mb"
    )]
    #[case::both_memory_forms(
        "compute_fleet: { instances: 1, cpu: 1, memory: 1Gi, memory_mb: 1024, max_connections: 1 }",
        "services.compute_fleet.memory"
    )]
    #[case::bad_scope(
        "load_balancer: { scope: planet, ssl_policy: modern }",
        "services.load_balancer.scope"
    )]
    #[case::negative_cpu(
        "compute_fleet: { instances: 1, cpu: -4, memory_mb: 1, max_connections: 1 }",
        "services.compute_fleet.cpu"
    )]
    #[case::wrong_type(
        "compute_fleet: { instances: ten, cpu: 1, memory_mb: 1, max_connections: 1 }",
        "services.compute_fleet.instances"
    )]
    #[case::ports_not_a_list(
        "relay_fleet: { instances: 1, cpu: 1, memory_mb: 1, ports: 3478 }",
        "services.relay_fleet.ports"
    )]
    fn test_service_violation_paths(#[case] service: &str, #[case] path: &str) {
        let err = parse_document(&with_service(service), "inline").unwrap_err();
        assert!(
            err.has_violation_at(path),
            "expected violation at {path}, got: {:?}",
            err.violations()
        );
    }

    #[test]
    fn test_type_error_does_not_hide_sibling_violations() {
        let doc = with_service(
            "compute_fleet: { instances: ten, cpu: 0, memory_mb: 1, max_connections: 1 }",
        );
        let err = parse_document(&doc, "inline").unwrap_err();

        assert!(err.has_violation_at("services.compute_fleet.instances"), "{err}");
        assert!(err.has_violation_at("services.compute_fleet.cpu"), "{err}");
        assert!(!err.has_violation_at("services.compute_fleet"), "{err}");
        assert_eq!(err.violations().len(), 2, "{err}");
    }

    #[test]
    fn test_unknown_field_does_not_hide_sibling_violations() {
        let doc = with_service("load_balancer: { scope: global, ssl_policy: ancient, tls: on }");
        let err = parse_document(&doc, "inline").unwrap_err();

        assert!(err.has_violation_at("services.load_balancer.tls"));
        assert!(err.has_violation_at("services.load_balancer.ssl_policy"));
        assert_eq!(err.violations().len(), 2, "{err}");
    }

    #[test]
    fn test_empty_services_is_valid() {
        let doc = "project: { id: a, region: b, zone: c }\nservices:";
        let state = parse_document(doc, "x").unwrap();
        assert!(state.services.is_empty());
    }

    #[rstest]
    #[case("512Mi", 512)]
    #[case("4Gi", 4096)]
    #[case("1Ti", 1024 * 1024)]
    #[case("2048", 2048)]
    fn test_parse_memory_quantity(#[case] text: &str, #[case] mb: i64) {
        assert_eq!(parse_memory_quantity(text).unwrap(), mb);
    }

    #[test]
    fn test_parse_memory_quantity_rejects_garbage() {
        assert!(parse_memory_quantity("lots").is_err());
        assert!(parse_memory_quantity("4GB").is_err());
    }

    #[test]
    fn test_serialized_state_parses_back() {
        let baseline = DesiredState::baseline();
        let yaml = serde_yaml::to_string(&baseline).unwrap();
        assert_eq!(parse_document(&yaml, "roundtrip").unwrap(), baseline);
    }
}
