use std::error::Error;
use std::io::Write;
use std::process::{Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use maintenance_supervisor::crd::KindRegistry;

/// Returns true if the given binary is accessible in PATH.
fn tool_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

const OPERATOR_NAMESPACE: &str = "maintenance-system";
const TEST_NAMESPACE: &str = "maintenance-e2e";
const OPERATOR_NAME: &str = "maintenance-supervisor";
const WEEKLY_WINDOW: &str = "weekly";
const DENIED_WINDOW: &str = "freeze";
const POLL_EVERY: Duration = Duration::from_secs(3);

// Run with: cargo test --test e2e_kind -- --ignored

/// End-to-end test of the approval lifecycle on a real Kind cluster:
///
/// 1. Start (or reuse) a Kind cluster and install the generated CRD.
/// 2. Deploy the supervisor with auto-approval enabled.
/// 3. Apply a MaintenanceWindow and wait for it to be Approved.
/// 4. Change its spec and wait for the new generation to be approved.
/// 5. Apply a window carrying a Denied verdict and check it wins over the policy.
/// 6. Delete the windows and wait until they are gone.
#[test]
#[ignore]
fn e2e_maintenance_window_approval() -> Result<(), Box<dyn Error>> {
    for tool in &["kind", "kubectl", "docker"] {
        if !tool_available(tool) {
            eprintln!("Skipping e2e test: `{tool}` not found in PATH.");
            return Ok(());
        }
    }

    let cluster_name =
        std::env::var("KIND_CLUSTER_NAME").unwrap_or_else(|_| "maintenance-e2e".into());
    ensure_kind_cluster(&cluster_name)?;

    // ── Install the CRD ──────────────────────────────────────────────────────
    for crd in KindRegistry::with_defaults()?.crds() {
        kubectl_apply(&serde_yaml::to_string(&crd)?)?;
    }
    run_cmd(
        "kubectl",
        &[
            "wait",
            "--for=condition=Established",
            "crd/maintenancewindows.supervisor.kubeops.dev",
            "--timeout=60s",
        ],
    )?;

    // ── Deploy the supervisor ────────────────────────────────────────────────
    let image = std::env::var("E2E_OPERATOR_IMAGE")
        .unwrap_or_else(|_| "maintenance-supervisor:e2e".into());
    if flag("E2E_BUILD_IMAGE", true) {
        run_cmd("docker", &["build", "-t", &image, "."])?;
    }
    if flag("E2E_LOAD_IMAGE", true) {
        run_cmd(
            "kind",
            &["load", "docker-image", &image, "--name", &cluster_name],
        )?;
    }

    let operator_yaml = operator_manifest(&image);
    let _cleanup = Cleanup::new(operator_yaml.clone());

    for namespace in [OPERATOR_NAMESPACE, TEST_NAMESPACE] {
        run_cmd(
            "kubectl",
            &[
                "create",
                "namespace",
                namespace,
                "--dry-run=client",
                "-o",
                "yaml",
            ],
        )
        .and_then(|output| kubectl_apply(&output))?;
    }

    kubectl_apply(&operator_yaml)?;
    run_cmd(
        "kubectl",
        &[
            "rollout",
            "status",
            &format!("deployment/{OPERATOR_NAME}"),
            "-n",
            OPERATOR_NAMESPACE,
            "--timeout=180s",
        ],
    )?;

    // ── New window is approved by policy ─────────────────────────────────────
    kubectl_apply(&window_manifest(WEEKLY_WINDOW, "09:00", "17:00", None))?;
    wait_for(
        "weekly window approved at generation 1",
        Duration::from_secs(90),
        || Ok(window_state(WEEKLY_WINDOW) == ("Approved".to_string(), "1".to_string())),
    )?;

    // ── Spec change needs a fresh approval ───────────────────────────────────
    kubectl_apply(&window_manifest(WEEKLY_WINDOW, "08:00", "18:00", None))?;
    wait_for(
        "weekly window approved at generation 2",
        Duration::from_secs(90),
        || Ok(window_state(WEEKLY_WINDOW) == ("Approved".to_string(), "2".to_string())),
    )?;

    // ── Explicit verdict wins over the policy ────────────────────────────────
    kubectl_apply(&window_manifest(DENIED_WINDOW, "00:00", "23:59", Some("Denied")))?;
    wait_for("freeze window denied", Duration::from_secs(90), || {
        Ok(window_state(DENIED_WINDOW).0 == "Denied")
    })?;

    // ── Delete and verify the windows are gone ───────────────────────────────
    for name in [WEEKLY_WINDOW, DENIED_WINDOW] {
        run_cmd(
            "kubectl",
            &[
                "delete",
                "maintenancewindow",
                name,
                "-n",
                TEST_NAMESPACE,
                "--timeout=60s",
            ],
        )?;
    }
    wait_for("windows deleted", Duration::from_secs(60), || {
        let remaining = run_cmd(
            "kubectl",
            &["get", "maintenancewindows", "-n", TEST_NAMESPACE, "-o", "name"],
        )?;
        Ok(remaining.is_empty())
    })?;

    Ok(())
}

/// `(status.status, status.observedGeneration)` of a window, empty when unset
fn window_state(name: &str) -> (String, String) {
    let output = run_cmd(
        "kubectl",
        &[
            "get",
            "maintenancewindow",
            name,
            "-n",
            TEST_NAMESPACE,
            "-o",
            "jsonpath={.status.status} {.status.observedGeneration}",
        ],
    )
    .unwrap_or_default();
    let mut parts = output.split_whitespace();
    (
        parts.next().unwrap_or_default().to_string(),
        parts.next().unwrap_or_default().to_string(),
    )
}

/// Monday-only window; a verdict is pinned to generation 1 when given.
fn window_manifest(name: &str, start: &str, end: &str, verdict: Option<&str>) -> String {
    let annotations = verdict
        .map(|v| {
            format!(
                "  annotations:\n    supervisor.kubeops.dev/approval: \"{v}\"\n    supervisor.kubeops.dev/approved-generation: \"1\"\n"
            )
        })
        .unwrap_or_default();
    format!(
        r#"apiVersion: supervisor.kubeops.dev/v1alpha1
kind: MaintenanceWindow
metadata:
  name: {name}
  namespace: {namespace}
{annotations}spec:
  days:
    Monday:
      - start: "{start}"
        end: "{end}"
  dates:
    - start: "2024-12-25T00:00:00Z"
      end: "2024-12-25T23:59:00Z"
"#,
        name = name,
        namespace = TEST_NAMESPACE,
        annotations = annotations,
        start = start,
        end = end,
    )
}

fn ensure_kind_cluster(name: &str) -> Result<(), Box<dyn Error>> {
    let clusters = run_cmd("kind", &["get", "clusters"])?;
    if clusters.lines().any(|line| line.trim() == name) {
        return Ok(());
    }
    run_cmd("kind", &["create", "cluster", "--name", name])?;
    Ok(())
}

fn kubectl_apply(manifest: &str) -> Result<(), Box<dyn Error>> {
    let args = ["apply", "-f", "-"];
    checked("kubectl", &args, exec("kubectl", &args, Some(manifest))?)?;
    Ok(())
}

/// Run a command to completion, returning trimmed stdout or a failure with both streams
fn run_cmd(program: &str, args: &[&str]) -> Result<String, Box<dyn Error>> {
    checked(program, args, exec(program, args, None)?)
}

/// Spawn `program`, feeding `stdin` when given; the exit status is not checked
fn exec(program: &str, args: &[&str], stdin: Option<&str>) -> std::io::Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(kubeconfig) = std::env::var_os("KUBECONFIG") {
        cmd.env("KUBECONFIG", kubeconfig);
    }

    let mut child = cmd.spawn()?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())?;
    }
    child.wait_with_output()
}

fn checked(program: &str, args: &[&str], output: Output) -> Result<String, Box<dyn Error>> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }
    Err(format!(
        "{program} {} exited with {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    )
    .into())
}

/// Re-check `ready` every few seconds until it holds or `timeout` passes
fn wait_for<F>(label: &str, timeout: Duration, mut ready: F) -> Result<(), Box<dyn Error>>
where
    F: FnMut() -> Result<bool, Box<dyn Error>>,
{
    let deadline = Instant::now() + timeout;
    let mut checks: u32 = 0;
    while !ready()? {
        checks += 1;
        if Instant::now() >= deadline {
            return Err(format!("gave up on {label} after {timeout:?} ({checks} checks)").into());
        }
        sleep(POLL_EVERY);
    }
    Ok(())
}

/// Boolean switch from the environment; unset means `default`
fn flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| ["1", "true", "yes", "on"].contains(&v.to_ascii_lowercase().as_str()))
        .unwrap_or(default)
}

fn operator_manifest(image: &str) -> String {
    format!(
        r#"---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: {operator_name}
  namespace: {operator_namespace}
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: {operator_name}
rules:
  - apiGroups: ["supervisor.kubeops.dev"]
    resources: ["maintenancewindows"]
    verbs: ["get", "list", "watch"]
  - apiGroups: ["supervisor.kubeops.dev"]
    resources: ["maintenancewindows/status"]
    verbs: ["get", "update", "patch"]
  - apiGroups: ["kubedb.com"]
    resources: ["mongodbs", "postgreses"]
    verbs: ["get", "list", "watch", "create", "delete"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: {operator_name}
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: {operator_name}
subjects:
  - kind: ServiceAccount
    name: {operator_name}
    namespace: {operator_namespace}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {operator_name}
  namespace: {operator_namespace}
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {operator_name}
  template:
    metadata:
      labels:
        app: {operator_name}
    spec:
      serviceAccountName: {operator_name}
      containers:
        - name: supervisor
          image: {image}
          imagePullPolicy: IfNotPresent
          args: ["run"]
          env:
            - name: OPERATOR_NAMESPACE
              value: {operator_namespace}
            - name: AUTO_APPROVE
              value: "true"
            - name: LOG_FORMAT
              value: json
"#,
        operator_name = OPERATOR_NAME,
        operator_namespace = OPERATOR_NAMESPACE,
        image = image
    )
}

/// RAII cleanup guard: removes the supervisor and the test namespaces.
struct Cleanup {
    operator_manifest: String,
}

impl Cleanup {
    fn new(operator_manifest: String) -> Self {
        Self { operator_manifest }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        let namespace_delete = |ns: &str| {
            let _ = exec(
                "kubectl",
                &["delete", "namespace", ns, "--ignore-not-found=true"],
                None,
            );
        };
        namespace_delete(TEST_NAMESPACE);
        let _ = exec(
            "kubectl",
            &["delete", "-f", "-"],
            Some(self.operator_manifest.as_str()),
        );
        namespace_delete(OPERATOR_NAMESPACE);
    }
}
