//! Startup script synthesis
//!
//! The script runs inside the volunteer's VM. It reassembles the image from
//! the attached archives, loads it into the VM's docker daemon and runs the
//! job's command with the shared directory mounted at the same path.

use std::fmt::Write as _;

use crate::command::Command;
use crate::image::ImageReference;

/// Default shared directory inside the VM.
pub const DEFAULT_SHARED_DIR: &str = "/root/shared";

/// Scratch tree the archives are unpacked into before `docker load`.
const SCRATCH: &str = "/tmp/image";

/// Marker written when the tar side of the load pipeline fails.
const TAR_FAILED: &str = "/tmp/image.tar-failed";

/// Inputs to [`render`].
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    pub image: ImageReference,
    pub entrypoint: Option<String>,
    pub command: Command,
    /// Shell lines run before the container, verbatim
    pub prerun: Vec<String>,
    /// Shell lines run after the container, verbatim
    pub postrun: Vec<String>,
    /// Image archive filenames in attachment order
    pub archives: Vec<String>,
    pub shared_dir: String,
    /// Print docker and host state before running
    pub diagnostics: bool,
}

impl ScriptConfig {
    pub fn new(image: ImageReference, command: Command) -> Self {
        Self {
            image,
            entrypoint: None,
            command,
            prerun: Vec::new(),
            postrun: Vec::new(),
            archives: Vec::new(),
            shared_dir: DEFAULT_SHARED_DIR.to_string(),
            diagnostics: true,
        }
    }
}

/// Render the startup script.
pub fn render(config: &ScriptConfig) -> String {
    let shared = config.shared_dir.trim_end_matches('/');
    let mut s = String::new();

    s.push_str("#!/bin/sh\nset -e\n\n");

    s.push_str("echo \"Importing Docker data from BOINC...\"\n");
    let _ = writeln!(s, "mkdir -p {}", SCRATCH);
    for archive in &config.archives {
        // open name shared/image/<name> lands under <shared>/image in the VM
        let path = format!("{}/image/{}", shared, archive);
        let _ = writeln!(s, "tar -xf {} -C {}", shell_words::quote(&path), SCRATCH);
    }
    // POSIX sh has no pipefail; the tar side reports failure through a marker.
    let _ = writeln!(s, "rm -f {}", TAR_FAILED);
    let _ = writeln!(
        s,
        "{{ tar cf - -C {} . || touch {}; }} | docker load",
        SCRATCH, TAR_FAILED
    );
    let _ = writeln!(
        s,
        "if [ -e {} ]; then echo \"Failed to repack image\" >&2; exit 1; fi",
        TAR_FAILED
    );
    let _ = writeln!(s, "rm -rf {}", SCRATCH);
    s.push('\n');

    if config.diagnostics {
        s.push_str("echo \"Prerun diagnostics...\"\n");
        s.push_str("docker images\n");
        s.push_str("docker ps -a\n");
        s.push_str("du -sh /var/lib/docker\n");
        s.push_str("free -m\n\n");
    }

    s.push_str("echo \"Prerun commands...\"\n");
    for line in &config.prerun {
        s.push_str(line);
        s.push('\n');
    }
    s.push('\n');

    s.push_str("echo \"Running...\"\n");
    let mut run = vec![
        "docker".to_string(),
        "run".to_string(),
        "--rm".to_string(),
        "-v".to_string(),
        format!("{}:{}", shared, shared),
    ];
    if let Some(entrypoint) = &config.entrypoint {
        run.push("--entrypoint".to_string());
        run.push(entrypoint.clone());
    }
    run.push(config.image.to_string());
    run.extend(config.command.to_args());
    s.push_str(&shell_words::join(&run));
    s.push_str("\n\n");

    s.push_str("echo \"Postrun commands...\"\n");
    for line in &config.postrun {
        s.push_str(line);
        s.push('\n');
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: Command) -> ScriptConfig {
        let mut config = ScriptConfig::new(ImageReference::parse("app").unwrap(), command);
        config.archives = vec![
            "layer_l1.tar".to_string(),
            "layer_l2.tar".to_string(),
            "image_abc.tar".to_string(),
        ];
        config
    }

    #[test]
    fn test_archives_extracted_in_attachment_order() {
        let script = render(&config(Command::default()));
        let positions: Vec<_> = ["layer_l1.tar", "layer_l2.tar", "image_abc.tar"]
            .iter()
            .map(|name| script.find(&format!("/root/shared/image/{} -C", name)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(!script.contains("*.tar"));
    }

    #[test]
    fn test_command_forms_render_identically() {
        let raw = render(&config(Command::from("echo foo")));
        let args = render(&config(Command::from(vec!["echo".to_string(), "foo".to_string()])));
        assert_eq!(raw, args);
        assert!(raw.contains("docker run --rm -v /root/shared:/root/shared app:latest echo foo\n"));
    }

    #[test]
    fn test_entrypoint_and_quoting() {
        let mut c = config(Command::from(vec!["-c".to_string(), "echo $HOME; ls".to_string()]));
        c.entrypoint = Some("/bin/sh".to_string());
        let script = render(&c);
        assert!(script.contains(
            "docker run --rm -v /root/shared:/root/shared --entrypoint /bin/sh app:latest -c 'echo $HOME; ls'\n"
        ));
    }

    #[test]
    fn test_hooks_are_verbatim_and_ordered() {
        let mut c = config(Command::default());
        c.prerun = vec!["export X=$(date)".to_string()];
        c.postrun = vec!["cp out/* /root/shared/ || true".to_string()];
        let script = render(&c);

        let pre = script.find("export X=$(date)\n").unwrap();
        let run = script.find("docker run").unwrap();
        let post = script.find("cp out/* /root/shared/ || true\n").unwrap();
        assert!(pre < run && run < post);
    }

    #[test]
    fn test_diagnostics_toggle() {
        let mut c = config(Command::default());
        assert!(render(&c).contains("docker ps -a\n"));
        c.diagnostics = false;
        assert!(!render(&c).contains("docker ps -a\n"));
    }

    #[test]
    fn test_load_pipeline_is_checked() {
        let script = render(&config(Command::default()));
        assert!(script.starts_with("#!/bin/sh\nset -e\n"));
        let load = script.find("| docker load").unwrap();
        let check = script.find("Failed to repack image").unwrap();
        assert!(load < check);
    }

    #[test]
    fn test_custom_shared_dir() {
        let mut c = config(Command::default());
        c.shared_dir = "/data/shared/".to_string();
        let script = render(&c);
        assert!(script.contains("tar -xf /data/shared/image/layer_l1.tar -C /tmp/image\n"));
        assert!(script.contains("-v /data/shared:/data/shared "));
    }
}
