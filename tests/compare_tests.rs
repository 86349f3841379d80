//! Tests for the drift comparator.
//!
//! Each attribute rule is exercised against inspect documents shaped the way
//! Docker and Podman report them.

use driftkeeper::compare::{AttributeKey, Comparator, EngineQuirks, VolumeMatch};
use driftkeeper::diagnostics::{render_diff, DebugTrace, Verbosity};
use driftkeeper::inspect::{ContainerInfo, ImageInfo};
use driftkeeper::spec::DesiredSpec;
use driftkeeper::Error;
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn spec(params: Value) -> DesiredSpec {
    DesiredSpec::from_params(params).unwrap()
}

/// Running container matching `{"name": "nova_api"}` on either engine.
fn base_live() -> Value {
    json!({
        "Name": "nova_api",
        "Image": "sha256:abc",
        "Path": "dumb-init",
        "Args": ["--single-child", "--", "kolla_start"],
        "State": {"Status": "running"},
        "Config": {
            "Image": "quay.io/openstack.kolla/nova-api:2024.1",
            "Env": ["PATH=/usr/bin", "KOLLA_SERVICE_NAME=nova-api"],
            "Labels": {},
            "User": ""
        },
        "HostConfig": {
            "Binds": [],
            "CapAdd": null,
            "SecurityOpt": null,
            "Privileged": false,
            "Memory": 0,
            "CpuShares": 0,
            "CpusetCpus": "",
            "Ulimits": null,
            "RestartPolicy": {"Name": "", "MaximumRetryCount": 0}
        },
        "Mounts": []
    })
}

fn live(mutate: impl FnOnce(&mut Value)) -> ContainerInfo {
    let mut raw = base_live();
    mutate(&mut raw);
    ContainerInfo::new(raw)
}

fn docker() -> Comparator {
    Comparator::new(EngineQuirks::docker())
}

fn podman() -> Comparator {
    Comparator::new(EngineQuirks::podman(false))
}

fn differs(comparator: &Comparator, key: AttributeKey, spec: &DesiredSpec, live: &ContainerInfo) -> bool {
    comparator.differs(key, spec, live, None).unwrap()
}

// =============================================================================
// Volume Tests
// =============================================================================

#[test]
fn test_scenario_readonly_timezone_mount_matches() {
    let desired = spec(json!({"name": "nova_api", "volumes": ["/etc/timezone:/etc/timezone:ro"]}));
    let live = live(|raw| {
        raw["Mounts"] = json!([{
            "Type": "bind",
            "Source": "/etc/timezone",
            "Destination": "/etc/timezone",
            "RW": false,
            "Propagation": "rprivate"
        }]);
    });
    assert!(!differs(&podman(), AttributeKey::Volumes, &desired, &live));
    assert!(!differs(&podman().with_volume_match(VolumeMatch::Strict), AttributeKey::Volumes, &desired, &live));
}

#[test]
fn test_volume_order_is_irrelevant() {
    let desired = spec(json!({"name": "nova_api", "volumes": ["a:/a", "b:/b"]}));
    let live = live(|raw| raw["HostConfig"]["Binds"] = json!(["b:/b", "a:/a"]));
    assert!(!differs(&docker(), AttributeKey::Volumes, &desired, &live));
}

#[test]
fn test_empty_and_pseudo_mounts_are_not_drift() {
    let desired = spec(json!({"name": "nova_api", "volumes": ["a:/a", "", "devpts:/dev/pts"]}));
    let live = live(|raw| {
        raw["HostConfig"]["Binds"] = json!(["a:/a"]);
        raw["Mounts"] = json!([{"Type": "devpts", "Source": "", "Destination": "/dev/pts", "RW": true}]);
    });
    assert!(!differs(&podman(), AttributeKey::Volumes, &desired, &live));
}

#[test]
fn test_missing_volume_is_drift() {
    let desired = spec(json!({"name": "nova_api", "volumes": ["a:/a", "b:/b"]}));
    let live = live(|raw| raw["HostConfig"]["Binds"] = json!(["a:/a"]));
    assert!(differs(&docker(), AttributeKey::Volumes, &desired, &live));
}

#[test]
fn test_volume_match_modes() {
    let desired = spec(json!({"name": "nova_api", "volumes": ["/etc/nova:/etc/nova:ro"]}));
    let live = live(|raw| raw["HostConfig"]["Binds"] = json!(["/etc/nova:/etc/nova:rw"]));

    assert!(!differs(&docker(), AttributeKey::Volumes, &desired, &live));
    assert!(differs(
        &docker().with_volume_match(VolumeMatch::Strict),
        AttributeKey::Volumes,
        &desired,
        &live
    ));
}

#[test]
fn test_named_volume_storage_path_matches_name() {
    let desired = spec(json!({"name": "nova_api", "volumes": ["kolla_logs:/var/log/kolla/"]}));
    let live = live(|raw| {
        raw["Mounts"] = json!([{
            "Type": "volume",
            "Name": "kolla_logs",
            "Source": "/var/lib/docker/volumes/kolla_logs/_data",
            "Destination": "/var/log/kolla",
            "RW": true
        }]);
    });
    assert!(!differs(&docker(), AttributeKey::Volumes, &desired, &live));
}

// =============================================================================
// Capability and Security Option Tests
// =============================================================================

#[test]
fn test_scenario_duplicated_caps_match() {
    let desired = spec(json!({"name": "nova_api", "cap_add": ["SYS_ADMIN", "NET_ADMIN"]}));
    let live = live(|raw| raw["HostConfig"]["CapAdd"] = json!(["NET_ADMIN", "SYS_ADMIN", "NET_ADMIN"]));
    assert!(!differs(&docker(), AttributeKey::CapAdd, &desired, &live));
}

#[test]
fn test_implicit_capability_is_suppressed() {
    let desired = spec(json!({"name": "nova_api", "cap_add": []}));
    let audit = live(|raw| raw["HostConfig"]["CapAdd"] = json!(["CAP_AUDIT_WRITE"]));
    let sys_admin = live(|raw| raw["HostConfig"]["CapAdd"] = json!(["CAP_SYS_ADMIN"]));

    assert!(!differs(&podman(), AttributeKey::CapAdd, &desired, &audit));
    assert!(differs(&podman(), AttributeKey::CapAdd, &desired, &sys_admin));
    assert!(differs(&docker(), AttributeKey::CapAdd, &desired, &audit));
}

#[test]
fn test_default_security_opt_is_suppressed() {
    let desired = spec(json!({"name": "nova_api"}));
    let live = live(|raw| raw["HostConfig"]["SecurityOpt"] = json!(["unmask=all"]));
    assert!(!differs(&podman(), AttributeKey::SecurityOpt, &desired, &live));
    assert!(differs(&docker(), AttributeKey::SecurityOpt, &desired, &live));
}

#[test]
fn test_security_opt_skipped_for_host_namespaces() {
    let live = live(|raw| raw["HostConfig"]["SecurityOpt"] = json!(["label=disable"]));
    for params in [
        json!({"name": "nova_api", "ipc_mode": "host"}),
        json!({"name": "nova_api", "pid_mode": "host"}),
        json!({"name": "nova_api", "privileged": true}),
    ] {
        assert!(!differs(&docker(), AttributeKey::SecurityOpt, &spec(params), &live));
    }
}

// =============================================================================
// Namespace Tests
// =============================================================================

#[test]
fn test_pid_mode_normalization() {
    let private = spec(json!({"name": "nova_api", "pid_mode": ""}));
    assert!(!differs(&docker(), AttributeKey::PidMode, &private, &live(|_| {})));

    let host = spec(json!({"name": "nova_api", "pid": "host"}));
    let nested = live(|raw| {
        raw["HostConfig"]["PidMode"] = json!("");
        raw["Config"]["HostConfig"] = json!({"PidNS": {"nsmode": "host"}});
    });
    assert!(!differs(&podman(), AttributeKey::PidMode, &host, &nested));
    assert!(differs(&podman(), AttributeKey::PidMode, &host, &live(|_| {})));
}

#[test]
fn test_pid_mode_unspecified_is_not_compared() {
    let desired = spec(json!({"name": "nova_api"}));
    let host = live(|raw| raw["HostConfig"]["PidMode"] = json!("host"));
    assert!(!differs(&docker(), AttributeKey::PidMode, &desired, &host));
}

#[test]
fn test_cgroupns_mode() {
    let unspecified = spec(json!({"name": "nova_api"}));
    assert!(!differs(&docker(), AttributeKey::CgroupnsMode, &unspecified, &live(|_| {})));

    let host = spec(json!({"name": "nova_api", "cgroupns_mode": "host"}));
    assert!(!differs(&docker(), AttributeKey::CgroupnsMode, &host, &live(|_| {})));

    let private = spec(json!({"name": "nova_api", "cgroupns_mode": "private"}));
    assert!(differs(&docker(), AttributeKey::CgroupnsMode, &private, &live(|_| {})));
}

// =============================================================================
// Environment and State Tests
// =============================================================================

#[test]
fn test_environment_only_desired_keys() {
    let desired = spec(json!({
        "name": "nova_api",
        "environment": {"KOLLA_SERVICE_NAME": "nova-api", "RECONCILE_DEBUG": "1"}
    }));
    assert!(!differs(&docker(), AttributeKey::Environment, &desired, &live(|_| {})));

    let changed = spec(json!({"name": "nova_api", "environment": {"KOLLA_SERVICE_NAME": "nova-conductor"}}));
    assert!(differs(&docker(), AttributeKey::Environment, &changed, &live(|_| {})));
}

#[test]
fn test_state_equivalences() {
    let started = spec(json!({"name": "nova_api", "state": "started"}));
    assert!(!differs(&docker(), AttributeKey::State, &started, &live(|_| {})));

    let exited = spec(json!({"name": "nova_api", "state": "exited"}));
    for status in ["created", "configured", "exited"] {
        let live = live(|raw| raw["State"]["Status"] = json!(status));
        assert!(!differs(&docker(), AttributeKey::State, &exited, &live));
    }
    assert!(differs(&docker(), AttributeKey::State, &exited, &live(|_| {})));
}

// =============================================================================
// Dimension Tests
// =============================================================================

#[test]
fn test_empty_dimensions_match_zero_resources() {
    let desired = spec(json!({"name": "nova_api", "dimensions": {}}));
    assert!(!differs(&docker(), AttributeKey::Dimensions, &desired, &live(|_| {})));
}

#[test]
fn test_omitted_dimension_must_match_default() {
    let desired = spec(json!({"name": "nova_api", "dimensions": {"cpu_shares": 512}}));
    let live = live(|raw| {
        raw["HostConfig"]["CpuShares"] = json!(512);
        raw["HostConfig"]["Memory"] = json!(1073741824);
    });
    assert!(differs(&docker(), AttributeKey::Dimensions, &desired, &live));
}

#[test]
fn test_dimension_units_and_resources_fallback() {
    let desired = spec(json!({"name": "nova_api", "dimensions": {"mem_limit": "1g"}}));
    let live = live(|raw| {
        raw["HostConfig"].as_object_mut().unwrap().remove("Memory");
        raw["HostConfig"]["Resources"] = json!({"Memory": 1073741824});
    });
    assert!(!differs(&podman(), AttributeKey::Dimensions, &desired, &live));
}

#[test]
fn test_ulimits_order_and_hard_limit_change() {
    let desired = spec(json!({
        "name": "nova_api",
        "dimensions": {"ulimits": {
            "nofile": {"soft": 1024, "hard": 2048},
            "memlock": {"soft": -1, "hard": -1}
        }}
    }));
    let same = live(|raw| {
        raw["HostConfig"]["Ulimits"] = json!([
            {"Name": "RLIMIT_MEMLOCK", "Soft": -1, "Hard": -1},
            {"Name": "RLIMIT_NOFILE", "Soft": 1024, "Hard": 2048},
            {"Name": "RLIMIT_NPROC", "Soft": 4194304, "Hard": 4194304}
        ]);
    });
    assert!(!differs(&podman(), AttributeKey::Dimensions, &desired, &same));

    let changed = live(|raw| {
        raw["HostConfig"]["Ulimits"] = json!([
            {"Name": "RLIMIT_MEMLOCK", "Soft": -1, "Hard": -1},
            {"Name": "RLIMIT_NOFILE", "Soft": 1024, "Hard": 4096}
        ]);
    });
    let mut trace = DebugTrace::new(Verbosity::Normal);
    let drift = podman().compare(&desired, &changed, None, &mut trace).unwrap();
    assert_eq!(drift.keys().collect::<Vec<_>>(), [AttributeKey::Dimensions]);
    let entry = &drift.entries()[0];
    assert_eq!(entry.desired["ulimits"]["nofile"]["hard"], json!(2048));
}

#[test]
fn test_unsupported_dimension_aborts_compare() {
    let desired = spec(json!({"name": "nova_api", "dimensions": {"gpus": 1}}));
    let mut trace = DebugTrace::default();
    let err = docker().compare(&desired, &live(|_| {}), None, &mut trace).unwrap_err();
    assert!(matches!(err, Error::UnsupportedDimension(_)));
}

#[test]
fn test_none_dimension_aborts_compare() {
    let desired = spec(json!({"name": "nova_api", "dimensions": {"kernel_memory": null}}));
    let mut trace = DebugTrace::default();
    let err = docker().compare(&desired, &live(|_| {}), None, &mut trace).unwrap_err();
    assert!(matches!(err, Error::RemovedDimension(ref key) if key == "kernel_memory"));
}

// =============================================================================
// Command and Healthcheck Tests
// =============================================================================

#[test]
fn test_scenario_command_drift_and_diff() {
    let desired = spec(json!({"name": "nova_api", "command": "/bin/new"}));
    let live = live(|raw| {
        raw["Path"] = json!("/bin/old");
        raw["Args"] = json!([]);
    });
    let mut trace = DebugTrace::default();
    let drift = docker().compare(&desired, &live, None, &mut trace).unwrap();
    assert!(drift.contains(AttributeKey::Command));

    let diff = render_diff(&drift).unwrap();
    assert!(diff.lines().any(|l| l == "- /bin/old"), "{diff}");
    assert!(diff.lines().any(|l| l == "+ /bin/new"), "{diff}");
    assert!(trace.lines().iter().any(|l| l.starts_with("command differs")));
}

#[test]
fn test_command_with_image_entrypoint() {
    let desired = spec(json!({"name": "nova_api", "command": "kolla_start"}));
    let image = ImageInfo {
        id: "sha256:abc".into(),
        entrypoint: vec!["dumb-init".into(), "--single-child".into(), "--".into()],
        ..ImageInfo::default()
    };
    let live = live(|_| {});
    assert!(!docker().differs(AttributeKey::Command, &desired, &live, Some(&image)).unwrap());
    assert!(docker().differs(AttributeKey::Command, &desired, &live, None).unwrap());
}

#[test]
fn test_command_whitespace_fallback() {
    let desired = spec(json!({"name": "nova_api", "command": "dumb-init  --single-child -- kolla_start"}));
    assert!(!differs(&docker(), AttributeKey::Command, &desired, &live(|_| {})));
}

#[test]
fn test_healthcheck_presence_mismatch() {
    let desired = spec(json!({
        "name": "nova_api",
        "healthcheck": {"test": "healthcheck_curl", "interval": 30, "timeout": 30, "start_period": 5, "retries": 3}
    }));
    assert!(differs(&docker(), AttributeKey::Healthcheck, &desired, &live(|_| {})));

    let with_hc = live(|raw| {
        raw["Config"]["Healthcheck"] = json!({
            "Test": ["CMD-SHELL", "healthcheck_curl"],
            "Interval": 30_000_000_000u64,
            "Timeout": 30_000_000_000u64,
            "StartPeriod": 5_000_000_000u64,
            "Retries": 3
        });
    });
    assert!(!differs(&docker(), AttributeKey::Healthcheck, &desired, &with_hc));
    assert!(differs(&docker(), AttributeKey::Healthcheck, &spec(json!({"name": "nova_api"})), &with_hc));
}

// =============================================================================
// Restart Policy, User, Image and Label Tests
// =============================================================================

#[test]
fn test_restart_policy_equivalences() {
    let no = spec(json!({"name": "nova_api", "restart_policy": "no"}));
    assert!(!differs(&docker(), AttributeKey::RestartPolicy, &no, &live(|_| {})));
    let unless_stopped = live(|raw| raw["HostConfig"]["RestartPolicy"]["Name"] = json!("unless-stopped"));
    assert!(!differs(&docker(), AttributeKey::RestartPolicy, &no, &unless_stopped));

    let retries = spec(json!({"name": "nova_api", "restart_policy": "on-failure", "restart_retries": 10}));
    let live_retries = live(|raw| raw["HostConfig"]["RestartPolicy"] = json!({"Name": "on-failure", "MaximumRetryCount": 3}));
    assert!(differs(&docker(), AttributeKey::RestartPolicy, &retries, &live_retries));
}

#[test]
fn test_restart_policy_collapse_only_for_desired_no() {
    let unless_stopped = spec(json!({"name": "nova_api", "restart_policy": "unless-stopped"}));
    let live_no = live(|raw| raw["HostConfig"]["RestartPolicy"]["Name"] = json!("no"));
    assert!(differs(&docker(), AttributeKey::RestartPolicy, &unless_stopped, &live_no));
    assert!(differs(&docker(), AttributeKey::RestartPolicy, &unless_stopped, &live(|_| {})));

    let live_unless = live(|raw| raw["HostConfig"]["RestartPolicy"]["Name"] = json!("unless-stopped"));
    assert!(!differs(&docker(), AttributeKey::RestartPolicy, &unless_stopped, &live_unless));

    let always = spec(json!({"name": "nova_api", "restart_policy": "always"}));
    assert!(differs(&docker(), AttributeKey::RestartPolicy, &always, &live_unless));
}

#[test]
fn test_restart_policy_skipped_when_supervised() {
    let always = spec(json!({"name": "nova_api", "restart_policy": "always"}));
    let delegated = Comparator::new(EngineQuirks::podman(true));
    assert!(!differs(&delegated, AttributeKey::RestartPolicy, &always, &live(|_| {})));
    assert!(differs(&podman(), AttributeKey::RestartPolicy, &always, &live(|_| {})));
}

#[test]
fn test_user_only_compared_when_specified() {
    let nova_user = live(|raw| raw["Config"]["User"] = json!("nova"));
    let unspecified = spec(json!({"name": "nova_api"}));
    assert!(!differs(&docker(), AttributeKey::User, &unspecified, &nova_user));

    let explicit_root = spec(json!({"name": "nova_api", "user": "root"}));
    assert!(differs(&docker(), AttributeKey::User, &explicit_root, &nova_user));
    assert!(!differs(&docker(), AttributeKey::User, &explicit_root, &live(|_| {})));

    let via_common = spec(json!({"name": "nova_api", "common_options": {"user": "0:0"}}));
    assert!(differs(&docker(), AttributeKey::User, &via_common, &nova_user));
}

#[test]
fn test_user_drift_requires_recreate() {
    let desired = spec(json!({"name": "nova_api", "user": "nova"}));
    let mut trace = DebugTrace::default();
    let drift = docker().compare(&desired, &live(|_| {}), None, &mut trace).unwrap();
    assert!(drift.needs_recreate);
    assert_eq!(drift.recreate_reasons, ["user"]);
}

#[test]
fn test_image_comparison() {
    let desired = spec(json!({"name": "nova_api", "image": "registry.local/openstack.kolla/nova-api:2024.1"}));
    let local = ImageInfo {
        id: "sha256:abc".into(),
        ..ImageInfo::default()
    };
    let live = live(|_| {});
    assert!(!docker().differs(AttributeKey::Image, &desired, &live, Some(&local)).unwrap());
    assert!(docker().differs(AttributeKey::Image, &desired, &live, None).unwrap());

    let rebuilt = ImageInfo {
        id: "sha256:def".into(),
        ..ImageInfo::default()
    };
    assert!(docker().differs(AttributeKey::Image, &desired, &live, Some(&rebuilt)).unwrap());
}

#[test]
fn test_inherited_image_labels_are_ignored() {
    let image = ImageInfo {
        id: "sha256:abc".into(),
        labels: BTreeMap::from([("build-date".to_string(), "20240101".to_string())]),
        ..ImageInfo::default()
    };
    let live = live(|raw| {
        raw["Config"]["Labels"] = json!({"build-date": "20240101", "kolla_version": "18.0.0"});
    });
    let desired = spec(json!({"name": "nova_api", "labels": {"kolla_version": "18.0.0"}}));
    assert!(!docker().differs(AttributeKey::Labels, &desired, &live, Some(&image)).unwrap());

    let overridden = spec(json!({"name": "nova_api", "labels": {"build-date": "20250101"}}));
    assert!(docker().differs(AttributeKey::Labels, &overridden, &live, Some(&image)).unwrap());
}

// =============================================================================
// Full Comparison Tests
// =============================================================================

#[test]
fn test_matching_container_has_no_drift() {
    let desired = spec(json!({
        "name": "nova_api",
        "image": "quay.io/openstack.kolla/nova-api:2024.1",
        "environment": {"KOLLA_SERVICE_NAME": "nova-api"},
        "dimensions": {}
    }));
    let image = ImageInfo {
        id: "sha256:abc".into(),
        ..ImageInfo::default()
    };
    let mut trace = DebugTrace::new(Verbosity::Verbose);
    let drift = docker().compare(&desired, &live(|_| {}), Some(&image), &mut trace).unwrap();
    assert!(!drift.changed(), "{:?}", drift.keys().collect::<Vec<_>>());
    assert!(render_diff(&drift).is_none());
    assert!(trace.lines().iter().any(|l| l == "image matches"));
}

#[test]
fn test_drift_keys_in_table_order() {
    let desired = spec(json!({
        "name": "nova_api",
        "privileged": true,
        "cap_add": ["NET_ADMIN"],
        "state": "exited"
    }));
    let mut trace = DebugTrace::default();
    let drift = docker().compare(&desired, &live(|_| {}), None, &mut trace).unwrap();
    assert_eq!(
        drift.keys().collect::<Vec<_>>(),
        [AttributeKey::CapAdd, AttributeKey::Privileged, AttributeKey::State]
    );
}
