//! In-memory collaborators for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use dockside_detect::Arch;

use crate::bundle::REQUIRED_BINARIES;
use crate::collaborators::{
    archive_names, BundleSource, Collaborators, ContextStore, Prompter, ServiceManager,
    SocketProbe, VersionIndex, VmManager, VmState,
};
use crate::error::UpdateError;

/// Write `<top>/<name>` entries into a gzip tarball at `path`.
pub fn write_bundle_archive(path: &Path, top: &str, files: &[(&str, &str)]) {
    let file = fs::File::create(path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::fast()));
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{top}/{name}"), body.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeServices {
    pub available: bool,
    pub calls: RefCell<Vec<String>>,
}

impl Default for FakeServices {
    fn default() -> Self {
        Self {
            available: true,
            calls: RefCell::default(),
        }
    }
}

impl ServiceManager for FakeServices {
    fn is_available(&self) -> bool {
        self.available
    }

    fn daemon_reload(&self) -> Result<(), UpdateError> {
        self.calls.borrow_mut().push("daemon-reload".into());
        Ok(())
    }

    fn restart(&self, unit: &str) -> Result<(), UpdateError> {
        self.calls.borrow_mut().push(format!("restart {unit}"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeContexts {
    pub contexts: RefCell<BTreeMap<String, String>>,
    pub current: RefCell<String>,
    pub reachable: Cell<bool>,
    pub calls: RefCell<Vec<String>>,
}

impl Default for FakeContexts {
    fn default() -> Self {
        Self {
            contexts: RefCell::default(),
            current: RefCell::new("default".into()),
            reachable: Cell::new(true),
            calls: RefCell::default(),
        }
    }
}

impl FakeContexts {
    pub fn with(name: &str, endpoint: &str) -> Self {
        let fake = Self::default();
        fake.contexts
            .borrow_mut()
            .insert(name.to_string(), endpoint.to_string());
        fake
    }
}

impl ContextStore for FakeContexts {
    fn endpoint(&self, name: &str) -> Result<Option<String>, UpdateError> {
        Ok(self.contexts.borrow().get(name).cloned())
    }

    fn create(&self, name: &str, endpoint: &str) -> Result<(), UpdateError> {
        self.calls.borrow_mut().push(format!("create {name} {endpoint}"));
        self.contexts
            .borrow_mut()
            .insert(name.to_string(), endpoint.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), UpdateError> {
        if *self.current.borrow() == name {
            return Err(UpdateError::Command {
                program: "docker".into(),
                message: format!("context {name} is in use"),
            });
        }
        self.calls.borrow_mut().push(format!("rm {name}"));
        self.contexts.borrow_mut().remove(name);
        Ok(())
    }

    fn current(&self) -> Result<String, UpdateError> {
        Ok(self.current.borrow().clone())
    }

    fn select(&self, name: &str) -> Result<(), UpdateError> {
        self.calls.borrow_mut().push(format!("use {name}"));
        *self.current.borrow_mut() = name.to_string();
        Ok(())
    }

    fn ping(&self, name: &str) -> Result<(), UpdateError> {
        self.calls.borrow_mut().push(format!("ping {name}"));
        if self.reachable.get() && self.contexts.borrow().contains_key(name) {
            Ok(())
        } else {
            Err(UpdateError::Command {
                program: "docker".into(),
                message: "Cannot connect to the Docker daemon".into(),
            })
        }
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeVms {
    pub available: bool,
    pub vms: RefCell<BTreeMap<String, VmState>>,
    pub calls: RefCell<Vec<String>>,
}

impl Default for FakeVms {
    fn default() -> Self {
        Self {
            available: true,
            vms: RefCell::default(),
            calls: RefCell::default(),
        }
    }
}

impl FakeVms {
    pub fn with(name: &str, state: VmState) -> Self {
        let fake = Self::default();
        fake.vms.borrow_mut().insert(name.to_string(), state);
        fake
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl VmManager for FakeVms {
    fn is_available(&self) -> bool {
        self.available
    }

    fn state(&self, name: &str) -> Result<VmState, UpdateError> {
        Ok(self.vms.borrow().get(name).copied().unwrap_or(VmState::Missing))
    }

    fn create(&self, name: &str, _template: &Path) -> Result<(), UpdateError> {
        self.log(format!("create {name}"));
        self.vms.borrow_mut().insert(name.to_string(), VmState::Running);
        Ok(())
    }

    fn start(&self, name: &str) -> Result<(), UpdateError> {
        self.log(format!("start {name}"));
        self.vms.borrow_mut().insert(name.to_string(), VmState::Running);
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<(), UpdateError> {
        self.log(format!("stop {name}"));
        self.vms.borrow_mut().insert(name.to_string(), VmState::Stopped);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), UpdateError> {
        self.log(format!("delete {name}"));
        self.vms.borrow_mut().remove(name);
        Ok(())
    }

    fn upgrade_packages(&self, name: &str) -> Result<(), UpdateError> {
        self.log(format!("upgrade {name}"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakePrompter {
    pub answer: bool,
    pub asked: RefCell<Vec<String>>,
}

impl FakePrompter {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: RefCell::default(),
        }
    }
}

impl Prompter for FakePrompter {
    fn confirm(&self, question: &str) -> Result<bool, UpdateError> {
        self.asked.borrow_mut().push(question.to_string());
        Ok(self.answer)
    }
}

// ---------------------------------------------------------------------------

/// Builds engine and rootless-extras tarballs on demand.
#[derive(Debug, Default)]
pub struct FakeBundleSource {
    pub omit: Option<&'static str>,
    pub downloads: Cell<usize>,
}

impl FakeBundleSource {
    pub fn complete() -> Self {
        Self::default()
    }

    pub fn missing(binary: &'static str) -> Self {
        Self {
            omit: Some(binary),
            downloads: Cell::new(0),
        }
    }
}

impl BundleSource for FakeBundleSource {
    fn download(&self, version: &str, _arch: Arch, dest: &Path) -> Result<Vec<PathBuf>, UpdateError> {
        self.downloads.set(self.downloads.get() + 1);
        fs::create_dir_all(dest).unwrap();
        let body = format!("#!/bin/sh\necho {version}\n");
        let keep = |name: &&str| Some(*name) != self.omit;

        let engine: Vec<(&str, &str)> = REQUIRED_BINARIES
            .iter()
            .copied()
            .filter(keep)
            .filter(|n| !matches!(*n, "rootlesskit" | "dockerd-rootless.sh"))
            .map(|n| (n, body.as_str()))
            .chain([("ctr", body.as_str())])
            .collect();
        let extras: Vec<(&str, &str)> = ["rootlesskit", "dockerd-rootless.sh"]
            .into_iter()
            .filter(keep)
            .map(|n| (n, body.as_str()))
            .collect();

        let [engine_name, extras_name] = archive_names(version);
        let engine_path = dest.join(engine_name);
        let extras_path = dest.join(extras_name);
        write_bundle_archive(&engine_path, "docker", &engine);
        write_bundle_archive(&extras_path, "docker-rootless-extras", &extras);
        Ok(vec![engine_path, extras_path])
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum IndexReply {
    Network,
    Parse,
}

#[derive(Debug)]
pub struct FakeIndex {
    reply: Result<String, IndexReply>,
    calls: Cell<usize>,
}

impl FakeIndex {
    pub fn ok(version: &str) -> Self {
        Self {
            reply: Ok(version.to_string()),
            calls: Cell::new(0),
        }
    }

    pub fn network_error() -> Self {
        Self {
            reply: Err(IndexReply::Network),
            calls: Cell::new(0),
        }
    }

    pub fn parse_error() -> Self {
        Self {
            reply: Err(IndexReply::Parse),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl VersionIndex for FakeIndex {
    fn latest_version(&self, _arch: Arch) -> Result<String, UpdateError> {
        self.calls.set(self.calls.get() + 1);
        match &self.reply {
            Ok(v) => Ok(v.clone()),
            Err(IndexReply::Network) => Err(UpdateError::Network("connection refused".into())),
            Err(IndexReply::Parse) => Err(UpdateError::Parse("no versions".into())),
        }
    }
}

// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeSockets {
    pub ready: Cell<bool>,
    pub probes: Cell<usize>,
}

impl FakeSockets {
    pub fn ready(ready: bool) -> Self {
        Self {
            ready: Cell::new(ready),
            probes: Cell::new(0),
        }
    }
}

impl SocketProbe for FakeSockets {
    fn is_ready(&self, _path: &Path) -> bool {
        self.probes.set(self.probes.get() + 1);
        self.ready.get()
    }
}

// ---------------------------------------------------------------------------

/// One of every fake, for building a [`Collaborators`].
#[derive(Debug)]
pub struct FakeWorld {
    pub services: FakeServices,
    pub contexts: FakeContexts,
    pub vms: FakeVms,
    pub prompter: FakePrompter,
    pub bundles: FakeBundleSource,
    pub index: FakeIndex,
    pub sockets: FakeSockets,
}

impl Default for FakeWorld {
    fn default() -> Self {
        Self {
            services: FakeServices::default(),
            contexts: FakeContexts::default(),
            vms: FakeVms::default(),
            prompter: FakePrompter::answering(true),
            bundles: FakeBundleSource::complete(),
            index: FakeIndex::network_error(),
            sockets: FakeSockets::ready(true),
        }
    }
}

impl FakeWorld {
    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            services: &self.services,
            contexts: &self.contexts,
            vms: &self.vms,
            prompter: &self.prompter,
            bundles: &self.bundles,
            index: &self.index,
            sockets: &self.sockets,
        }
    }
}
