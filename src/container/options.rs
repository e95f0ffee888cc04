//! Typed run and commit options for build containers
//!
//! Options are layered with [`ContainerOptions::merge`]: list fields append,
//! map fields overlay key by key, and scalar fields take the last non-empty
//! value.

use crate::orchestration::ImageConfigInspect;
use std::collections::BTreeMap;

/// Runtime parameters of a build container or the image committed from it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    pub volumes: Vec<String>,
    pub volumes_from: Vec<String>,
    pub expose: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub cmd: Option<Vec<String>>,
    pub onbuild: Vec<String>,
    pub workdir: Option<String>,
    pub user: Option<String>,
    pub entrypoint: Option<Vec<String>>,
    pub stop_signal: Option<String>,
    pub healthcheck: Option<String>,
}

fn non_empty_str(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

fn non_empty_vec(value: &Option<Vec<String>>) -> Option<Vec<String>> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn last_non_empty<T, F>(base: &Option<T>, overlay: &Option<T>, pick: F) -> Option<T>
where
    F: Fn(&Option<T>) -> Option<T>,
{
    pick(overlay).or_else(|| pick(base))
}

/// Quote an ENV/LABEL value when the instruction parser would split it
fn quote_value(value: &str) -> String {
    if value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    } else {
        value.to_string()
    }
}

/// Render an exec-form instruction argument (`["a", "b"]`)
fn exec_form(args: &[String]) -> String {
    serde_json::Value::from(args.to_vec()).to_string()
}

impl ContainerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options inherited from a base image's configuration.
    ///
    /// The working directory defaults to `/` when the image does not set one.
    pub fn inherited_from(config: &ImageConfigInspect) -> Self {
        Self {
            cmd: Some(config.cmd.clone()).filter(|v| !v.is_empty()),
            entrypoint: Some(config.entrypoint.clone()).filter(|v| !v.is_empty()),
            user: Some(config.user.clone()).filter(|u| !u.is_empty()),
            workdir: Some(if config.working_dir.is_empty() {
                "/".to_string()
            } else {
                config.working_dir.clone()
            }),
            ..Self::default()
        }
    }

    /// Layer `overlay` on top of `self`
    pub fn merge(&self, overlay: &ContainerOptions) -> ContainerOptions {
        let mut env = self.env.clone();
        env.extend(overlay.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut labels = self.labels.clone();
        labels.extend(overlay.labels.iter().map(|(k, v)| (k.clone(), v.clone())));

        ContainerOptions {
            volumes: [self.volumes.as_slice(), overlay.volumes.as_slice()].concat(),
            volumes_from: [self.volumes_from.as_slice(), overlay.volumes_from.as_slice()]
                .concat(),
            expose: [self.expose.as_slice(), overlay.expose.as_slice()].concat(),
            env,
            labels,
            cmd: last_non_empty(&self.cmd, &overlay.cmd, non_empty_vec),
            onbuild: [self.onbuild.as_slice(), overlay.onbuild.as_slice()].concat(),
            workdir: last_non_empty(&self.workdir, &overlay.workdir, non_empty_str),
            user: last_non_empty(&self.user, &overlay.user, non_empty_str),
            entrypoint: last_non_empty(&self.entrypoint, &overlay.entrypoint, non_empty_vec),
            stop_signal: last_non_empty(&self.stop_signal, &overlay.stop_signal, non_empty_str),
            healthcheck: last_non_empty(&self.healthcheck, &overlay.healthcheck, non_empty_str),
        }
    }

    /// Copy with the fields that only take effect at commit time cleared.
    ///
    /// Entrypoint, working directory and user of a running build container
    /// belong to the service layer.
    pub fn without_execution_fields(&self) -> ContainerOptions {
        ContainerOptions {
            workdir: None,
            user: None,
            entrypoint: None,
            ..self.clone()
        }
    }

    /// Render as `<runtime> create` flags
    pub fn to_run_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        args.extend(self.volumes.iter().map(|v| format!("--volume={}", v)));
        args.extend(self.volumes_from.iter().map(|v| format!("--volumes-from={}", v)));
        args.extend(self.expose.iter().map(|p| format!("--expose={}", p)));
        args.extend(self.env.iter().map(|(k, v)| format!("--env={}={}", k, v)));
        args.extend(self.labels.iter().map(|(k, v)| format!("--label={}={}", k, v)));

        if let Some(user) = &self.user {
            args.push(format!("--user={}", user));
        }
        if let Some(workdir) = &self.workdir {
            args.push(format!("--workdir={}", workdir));
        }
        if let Some(entrypoint) = &self.entrypoint {
            args.push(format!("--entrypoint={}", entrypoint.join(" ")));
        }

        args
    }

    /// Render as `commit --change` instructions
    pub fn to_commit_changes(&self) -> Vec<String> {
        let mut changes = Vec::new();

        changes.extend(self.volumes.iter().map(|v| format!("VOLUME {}", v)));
        changes.extend(self.expose.iter().map(|p| format!("EXPOSE {}", p)));
        changes.extend(
            self.env
                .iter()
                .map(|(k, v)| format!("ENV {}={}", k, quote_value(v))),
        );
        changes.extend(
            self.labels
                .iter()
                .map(|(k, v)| format!("LABEL {}={}", quote_value(k), quote_value(v))),
        );

        if let Some(cmd) = &self.cmd {
            changes.push(format!("CMD {}", exec_form(cmd)));
        }
        changes.extend(self.onbuild.iter().map(|i| format!("ONBUILD {}", i)));
        if let Some(workdir) = &self.workdir {
            changes.push(format!("WORKDIR {}", workdir));
        }
        if let Some(user) = &self.user {
            changes.push(format!("USER {}", user));
        }
        if let Some(entrypoint) = &self.entrypoint {
            changes.push(format!("ENTRYPOINT {}", exec_form(entrypoint)));
        }
        if let Some(signal) = &self.stop_signal {
            changes.push(format!("STOPSIGNAL {}", signal));
        }
        if let Some(healthcheck) = &self.healthcheck {
            changes.push(format!("HEALTHCHECK {}", healthcheck));
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn merge_scalars_last_non_empty_wins() {
        let base = ContainerOptions {
            workdir: Some("/srv".to_string()),
            user: Some("app".to_string()),
            ..Default::default()
        };
        let overlay = ContainerOptions {
            workdir: Some("/app".to_string()),
            user: Some(String::new()),
            ..Default::default()
        };

        let merged = base.merge(&overlay);
        assert_eq!(merged.workdir.as_deref(), Some("/app"));
        assert_eq!(merged.user.as_deref(), Some("app"));
    }

    #[test]
    fn merge_lists_append_and_maps_overlay() {
        let mut base = ContainerOptions {
            volumes: strings(&["/data"]),
            ..Default::default()
        };
        base.env.insert("A".to_string(), "1".to_string());
        base.env.insert("B".to_string(), "1".to_string());

        let mut overlay = ContainerOptions {
            volumes: strings(&["/cache"]),
            ..Default::default()
        };
        overlay.env.insert("B".to_string(), "2".to_string());

        let merged = base.merge(&overlay);
        assert_eq!(merged.volumes, strings(&["/data", "/cache"]));
        assert_eq!(merged.env["A"], "1");
        assert_eq!(merged.env["B"], "2");
    }

    #[test]
    fn inherited_defaults_workdir_to_root() {
        let inherited = ContainerOptions::inherited_from(&ImageConfigInspect {
            cmd: strings(&["/bin/sh"]),
            ..Default::default()
        });

        assert_eq!(inherited.workdir.as_deref(), Some("/"));
        assert_eq!(inherited.cmd, Some(strings(&["/bin/sh"])));
        assert_eq!(inherited.entrypoint, None);
        assert_eq!(inherited.user, None);
    }

    #[test]
    fn user_values_win_over_inherited() {
        let inherited = ContainerOptions::inherited_from(&ImageConfigInspect {
            cmd: strings(&["/bin/sh"]),
            user: "nobody".to_string(),
            working_dir: "/srv".to_string(),
            ..Default::default()
        });
        let user = ContainerOptions {
            cmd: Some(strings(&["/app/server"])),
            workdir: Some("/app".to_string()),
            ..Default::default()
        };

        let merged = inherited.merge(&ContainerOptions::default()).merge(&user);
        assert_eq!(merged.cmd, Some(strings(&["/app/server"])));
        assert_eq!(merged.workdir.as_deref(), Some("/app"));
        assert_eq!(merged.user.as_deref(), Some("nobody"));
    }

    #[test]
    fn run_args_rendering() {
        let mut options = ContainerOptions {
            volumes: strings(&["/host:/ctr:ro"]),
            volumes_from: strings(&["tooling"]),
            workdir: Some("/".to_string()),
            user: Some("0:0".to_string()),
            entrypoint: Some(strings(&["/.stagehand/bin/bash"])),
            ..Default::default()
        };
        options.env.insert("A".to_string(), "1".to_string());

        assert_eq!(
            options.to_run_args(),
            strings(&[
                "--volume=/host:/ctr:ro",
                "--volumes-from=tooling",
                "--env=A=1",
                "--user=0:0",
                "--workdir=/",
                "--entrypoint=/.stagehand/bin/bash",
            ])
        );
    }

    #[test]
    fn commit_changes_rendering() {
        let mut options = ContainerOptions {
            expose: strings(&["8080/tcp"]),
            cmd: Some(strings(&["server", "--port", "8080"])),
            entrypoint: Some(strings(&["/entry.sh"])),
            workdir: Some("/app".to_string()),
            stop_signal: Some("SIGTERM".to_string()),
            ..Default::default()
        };
        options
            .env
            .insert("GREETING".to_string(), "hello world".to_string());

        let changes = options.to_commit_changes();
        assert!(changes.contains(&"EXPOSE 8080/tcp".to_string()));
        assert!(changes.contains(&"ENV GREETING=\"hello world\"".to_string()));
        assert!(changes.contains(&"CMD [\"server\",\"--port\",\"8080\"]".to_string()));
        assert!(changes.contains(&"ENTRYPOINT [\"/entry.sh\"]".to_string()));
        assert!(changes.contains(&"WORKDIR /app".to_string()));
        assert!(changes.contains(&"STOPSIGNAL SIGTERM".to_string()));
    }

    #[test]
    fn execution_fields_are_stripped() {
        let options = ContainerOptions {
            workdir: Some("/app".to_string()),
            user: Some("app".to_string()),
            entrypoint: Some(strings(&["/entry.sh"])),
            volumes: strings(&["/data"]),
            ..Default::default()
        };

        let stripped = options.without_execution_fields();
        assert_eq!(stripped.workdir, None);
        assert_eq!(stripped.user, None);
        assert_eq!(stripped.entrypoint, None);
        assert_eq!(stripped.volumes, strings(&["/data"]));
    }
}
