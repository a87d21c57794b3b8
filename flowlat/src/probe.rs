use anyhow::Context as _;
use aya::maps::{MapData, RingBuf};
use aya::programs::{tc, SchedClassifier, TcAttachType};
use aya::Ebpf;
use std::path::Path;
use std::process::Command;

use crate::config::Direction;

/// Name of the `#[classifier]` function in the eBPF object.
const PROGRAM: &str = "flowlat";
/// Name of the RingBuf map the classifier writes flow records to.
const EVENTS_MAP: &str = "EVENTS";

const EEXIST: i32 = 17;

impl Direction {
    fn attach_types(self) -> &'static [TcAttachType] {
        match self {
            Direction::Ingress => &[TcAttachType::Ingress],
            Direction::Egress => &[TcAttachType::Egress],
            Direction::Both => &[TcAttachType::Ingress, TcAttachType::Egress],
        }
    }
}

/// A clsact qdisc this process added and must remove again.
#[derive(Debug)]
struct Clsact {
    iface: String,
}

impl Clsact {
    /// aya can add a clsact qdisc but not delete one, so this goes through `tc`.
    fn delete_command(&self) -> Command {
        let mut cmd = Command::new("tc");
        cmd.args(["qdisc", "del", "dev", &self.iface, "clsact"]);
        cmd
    }

    fn remove(&self) -> anyhow::Result<()> {
        let output = self
            .delete_command()
            .output()
            .context("failed to run tc")?;
        anyhow::ensure!(
            output.status.success(),
            "tc qdisc del failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        Ok(())
    }
}

/// Loaded classifier. Dropping it detaches every TC link it created;
/// [`Probe::close`] also removes the clsact qdisc if this probe added it.
pub struct Probe {
    bpf: Ebpf,
    clsact: Option<Clsact>,
}

impl Probe {
    pub fn load(object: &Path) -> anyhow::Result<Self> {
        tracing::info!("Loading probe object {}", object.display());
        let bpf = Ebpf::load_file(object).with_context(|| {
            format!(
                "failed to load eBPF object {} (build it with `cargo xtask build-ebpf`)",
                object.display()
            )
        })?;
        Ok(Self { bpf, clsact: None })
    }

    /// Add the clsact qdisc and attach the classifier to the requested hooks.
    pub fn attach(&mut self, iface: &str, direction: Direction) -> anyhow::Result<()> {
        // An existing clsact qdisc (EEXIST) is reused and left in place on close.
        match tc::qdisc_add_clsact(iface) {
            Ok(()) => {
                self.clsact = Some(Clsact {
                    iface: iface.to_string(),
                })
            }
            Err(e) if e.raw_os_error() == Some(EEXIST) => {
                tracing::debug!("clsact qdisc already exists on {}, reusing", iface);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to add clsact qdisc on {iface}"))
            }
        }

        let program: &mut SchedClassifier = self
            .bpf
            .program_mut(PROGRAM)
            .with_context(|| format!("program {PROGRAM} not found in eBPF object"))?
            .try_into()?;
        program.load()?;

        for attach_type in direction.attach_types() {
            program
                .attach(iface, *attach_type)
                .with_context(|| format!("failed to attach to {iface} ({attach_type:?})"))?;
            tracing::info!("eBPF TC classifier attached to {} ({:?})", iface, attach_type);
        }
        Ok(())
    }

    /// Take ownership of the event ring buffer. Can only be called once.
    pub fn events(&mut self) -> anyhow::Result<RingBuf<MapData>> {
        let map = self
            .bpf
            .take_map(EVENTS_MAP)
            .with_context(|| format!("map {EVENTS_MAP} not found in eBPF object"))?;
        Ok(RingBuf::try_from(map)?)
    }

    /// Detach the classifier, then remove the qdisc if `attach` created it.
    pub fn close(self) {
        let Probe { bpf, clsact } = self;
        drop(bpf);
        if let Some(clsact) = clsact {
            tracing::info!("Removing clsact qdisc from {}", clsact.iface);
            if let Err(e) = clsact.remove() {
                tracing::warn!("Could not remove clsact qdisc from {}: {:#}", clsact.iface, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_attach_types() {
        assert_eq!(Direction::Ingress.attach_types().len(), 1);
        assert_eq!(Direction::Egress.attach_types().len(), 1);
        assert_eq!(Direction::Both.attach_types().len(), 2);
    }

    #[test]
    fn test_clsact_delete_command() {
        let clsact = Clsact {
            iface: "veth0".into(),
        };
        let cmd = clsact.delete_command();
        assert_eq!(cmd.get_program(), "tc");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["qdisc", "del", "dev", "veth0", "clsact"]);
    }
}
