/// Immutable kubectl command model
///
/// A `KubeCmd` is a value: verb, positional args, and a flag map.
/// Builder methods return a new command and never touch the receiver,
/// so a base command can be kept around as a template and derived from
/// freely. Nothing is validated here; a bad verb/flag combination is
/// the external tool's problem at execution time.
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeCmd {
    verb: String,
    args: Vec<String>,
    flags: BTreeMap<String, String>,
}

impl KubeCmd {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            args: Vec::new(),
            flags: BTreeMap::new(),
        }
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    /// Set a flag, overwriting any prior value for the same name.
    pub fn with_flag(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut cmd = self.clone();
        cmd.flags.insert(name.into(), value.into());
        cmd
    }

    pub fn in_namespace(&self, namespace: &str) -> Self {
        self.with_flag("namespace", namespace)
    }

    pub fn format_output(&self, output_type: &str) -> Self {
        self.with_flag("output", output_type)
    }

    /// Append one positional argument.
    pub fn with_arg(&self, arg: impl Into<String>) -> Self {
        let mut cmd = self.clone();
        cmd.args.push(arg.into());
        cmd
    }

    /// Append a label selector (`-l <label>`) to the positional args.
    pub fn with_label(&self, label: &str) -> Self {
        self.with_arg("-l").with_arg(label)
    }

    /// Render for the CLI. Flags go first so a `--` in the positional
    /// args cannot swallow them.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .flags
            .iter()
            .map(|(name, value)| format!("--{}={}", name, value))
            .collect();
        args.push(self.verb.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

fn with_args<I, S>(verb: &str, args: I) -> KubeCmd
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut cmd = KubeCmd::new(verb);
    cmd.args = args.into_iter().map(Into::into).collect();
    cmd
}

fn per_path_args<I, P>(verb: &str, paths: I) -> KubeCmd
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut cmd = KubeCmd::new(verb);
    for path in paths {
        cmd.args.push("-f".to_string());
        cmd.args.push(path.as_ref().display().to_string());
    }
    cmd
}

fn per_name_args<I, S>(verb: &str, resource_type: &str, names: I) -> KubeCmd
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut cmd = KubeCmd::new(verb);
    cmd.args = names
        .into_iter()
        .map(|n| format!("{}/{}", resource_type, n.into()))
        .collect();
    cmd
}

pub fn get<I, S>(args: I) -> KubeCmd
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    with_args("get", args)
}

pub fn get_by_type_and_name<I, S>(resource_type: &str, names: I) -> KubeCmd
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    per_name_args("get", resource_type, names)
}

pub fn get_by_files<I, P>(paths: I) -> KubeCmd
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    per_path_args("get", paths)
}

pub fn delete<I, S>(args: I) -> KubeCmd
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    with_args("delete", args)
}

pub fn delete_by_type_and_name<I, S>(resource_type: &str, names: I) -> KubeCmd
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    per_name_args("delete", resource_type, names)
}

pub fn delete_from_files<I, P>(paths: I) -> KubeCmd
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    per_path_args("delete", paths)
}

pub fn apply_files<I, P>(paths: I) -> KubeCmd
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    per_path_args("apply", paths)
}

pub fn create_from_files<I, P>(paths: I) -> KubeCmd
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    per_path_args("create", paths)
}

pub fn create_namespace(namespace: &str) -> KubeCmd {
    with_args("create", ["namespace", namespace])
}

pub fn delete_namespace(namespace: &str) -> KubeCmd {
    with_args("delete", ["namespace", namespace])
}

pub fn create_secret_literal(name: &str, user: &str, pw: &str) -> KubeCmd {
    with_args("create", ["secret", "generic", name])
        .with_flag("from-literal=username", user)
        .with_flag("from-literal=password", pw)
}

pub fn taint(node: &str, key: &str, value: &str, effect: &str) -> KubeCmd {
    with_args("taint", ["nodes", node])
        .with_arg(format!("{}={}:{}", key, value, effect))
}

pub fn annotate(resource: &str, name: &str, key: &str, value: &str) -> KubeCmd {
    with_args("annotate", [resource, name]).with_arg(format!("{}={}", key, value))
}

pub fn patch_merge(resource: &str, data: &str) -> KubeCmd {
    with_args("patch", [resource, "--patch", data, "--type", "merge"])
}

pub fn patch_json(resource: &str, data: &str) -> KubeCmd {
    with_args("patch", [resource, "--patch", data, "--type", "json"])
}

pub fn cluster_info_for_context(context: &str) -> KubeCmd {
    with_args("cluster-info", ["--context", context])
}

pub fn exec_on_pod<I, S>(pod_name: &str, args: I) -> KubeCmd
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut cmd = KubeCmd::new("exec");
    cmd.args.push(pod_name.to_string());
    cmd.args.extend(args.into_iter().map(Into::into));
    cmd
}

pub fn get_node_name_for_pod(pod_name: &str) -> KubeCmd {
    get([format!("pod/{}", pod_name)]).format_output("jsonpath={.spec.nodeName}")
}

/// Dump cluster logs for one namespace under `path` via
/// `cluster-info dump`. The directory is created up front so the dump
/// target always exists.
pub fn dump_logs(path: &Path, namespace: &str) -> KubeCmd {
    let _ = std::fs::create_dir_all(path);
    with_args("cluster-info", ["dump", "-n", namespace])
        .with_flag("output-directory", path.display().to_string())
}

/// Dump cluster logs for all namespaces under `path`.
pub fn dump_all_logs(path: &Path) -> KubeCmd {
    let _ = std::fs::create_dir_all(path);
    with_args("cluster-info", ["dump", "-A"])
        .with_flag("output-directory", path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_flag_last_write_wins() {
        let cmd = get(["pods"]).with_flag("x", "1").with_flag("x", "2");
        assert_eq!(cmd.flag("x"), Some("2"));
        let rendered = cmd.to_cli_args();
        assert!(rendered.contains(&"--x=2".to_string()));
        assert!(!rendered.contains(&"--x=1".to_string()));
    }

    #[test]
    fn test_in_namespace_idempotent() {
        let once = get(["pods"]).in_namespace("test-ns");
        let twice = once.in_namespace("test-ns");
        assert_eq!(once, twice);
        assert_eq!(once.to_cli_args(), twice.to_cli_args());
    }

    #[test]
    fn test_builders_do_not_mutate_base() {
        let base = get(["pods"]);
        let a = base.with_flag("x", "1");
        let b = base.with_flag("x", "2").with_label("app=x");
        assert_eq!(base.flag("x"), None);
        assert_eq!(a.flag("x"), Some("1"));
        assert_eq!(b.flag("x"), Some("2"));
        assert_eq!(base.to_cli_args(), vec!["get", "pods"]);
    }

    #[test]
    fn test_equivalent_build_sequences_render_identically() {
        let a = get(["pods"]).in_namespace("ns1").format_output("json");
        let b = get(["pods"]).format_output("json").in_namespace("ns1");
        assert_eq!(a, b);
        assert_eq!(a.to_cli_args(), b.to_cli_args());
    }

    #[test]
    fn test_cli_args_flags_before_verb() {
        let cmd = get(["pods"]).in_namespace("ns1").format_output("json");
        assert_eq!(
            cmd.to_cli_args(),
            vec!["--namespace=ns1", "--output=json", "get", "pods"]
        );
    }

    #[test]
    fn test_with_label_appends_selector() {
        let cmd = get(["pods"]).with_label("app=x");
        assert_eq!(cmd.to_cli_args(), vec!["get", "pods", "-l", "app=x"]);
    }

    #[test]
    fn test_by_type_and_name_constructors() {
        let cmd = get_by_type_and_name("pod", ["a", "b"]);
        assert_eq!(cmd.to_cli_args(), vec!["get", "pod/a", "pod/b"]);
        let cmd = delete_by_type_and_name("namespace", ["test-ns"]);
        assert_eq!(cmd.to_cli_args(), vec!["delete", "namespace/test-ns"]);
    }

    #[test]
    fn test_file_constructors() {
        let cmd = apply_files([Path::new("a.yaml"), Path::new("b.yaml")]);
        assert_eq!(
            cmd.to_cli_args(),
            vec!["apply", "-f", "a.yaml", "-f", "b.yaml"]
        );
    }

    #[test]
    fn test_create_secret_literal_flags() {
        let cmd = create_secret_literal("creds", "admin", "hunter2");
        let args = cmd.to_cli_args();
        assert!(args.contains(&"--from-literal=username=admin".to_string()));
        assert!(args.contains(&"--from-literal=password=hunter2".to_string()));
        assert!(args.ends_with(&[
            "create".to_string(),
            "secret".to_string(),
            "generic".to_string(),
            "creds".to_string()
        ]));
    }

    #[test]
    fn test_patch_merge_args() {
        let cmd = patch_merge("Widget/w1", "{\"spec\":{\"size\":2}}");
        assert_eq!(
            cmd.to_cli_args(),
            vec![
                "patch",
                "Widget/w1",
                "--patch",
                "{\"spec\":{\"size\":2}}",
                "--type",
                "merge"
            ]
        );
    }

    #[test]
    fn test_dump_logs_targets_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("step");
        let cmd = dump_logs(&path, "test-ns");
        assert!(path.is_dir());
        assert_eq!(cmd.flag("output-directory"), Some(&*path.display().to_string()));
        assert_eq!(cmd.verb(), "cluster-info");
    }
}
