//! Carries the live system's network configuration over to the target.

use crate::{
    errors::IoContext,
    installer::{ConfigSource, PhaseError},
};
use filetime::FileTime;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub const DEFAULT_HOSTNAME: &str = "ubuntu";

/// Hardware type of Ethernet devices, as reported by `/sys/class/net/*/type`.
const ARPHRD_ETHER: u16 = 1;

const COPIED: &[&str] = &["etc/network/interfaces", "etc/resolv.conf"];

const IFTAB_HEADER: &str = "# This file assigns persistent names to network interfaces.\n\
                            # See iftab(5) for syntax.\n\n";

/// A network interface of the live system.
#[derive(Clone, Debug, PartialEq)]
pub struct Interface {
    pub name:    String,
    pub hw_type: Option<u16>,
    pub address: Option<String>,
}

/// Names of the interfaces listed in the contents of `/proc/net/dev`.
pub fn parse_net_dev(contents: &str) -> Vec<String> {
    contents
        .lines()
        .skip(2)
        .filter_map(|line| {
            let line = line.trim_start();
            line.find(':').map(|end| line[..end].to_owned())
        })
        .collect()
}

/// Every interface except loopback, with its hardware type and address
/// when they can be read.
pub fn read_interfaces(net_dev: &Path, sys_class_net: &Path) -> io::Result<Vec<Interface>> {
    let contents = fs::read_to_string(net_dev)
        .with_context(|why| format!("failed to read {}: {}", net_dev.display(), why))?;

    let interfaces = parse_net_dev(&contents)
        .into_iter()
        .filter(|name| name != "lo")
        .map(|name| {
            let device = sys_class_net.join(&name);
            let hw_type = fs::read_to_string(device.join("type"))
                .ok()
                .and_then(|value| value.trim().parse::<u16>().ok());
            let address = fs::read_to_string(device.join("address"))
                .ok()
                .map(|value| value.trim().to_lowercase());
            Interface { name, hw_type, address }
        })
        .collect();

    Ok(interfaces)
}

/// Persistent names for each Ethernet interface, keyed on its address.
///
/// Interfaces sharing an address with another Ethernet interface cannot be
/// told apart, and are left out. Where a non-Ethernet interface shares the
/// address, the hardware type is included to disambiguate.
pub fn iftab(interfaces: &[Interface]) -> String {
    let mut out = String::from(IFTAB_HEADER);

    for (i, interface) in interfaces.iter().enumerate() {
        let address = match (interface.hw_type, interface.address.as_ref()) {
            (Some(ARPHRD_ETHER), Some(address)) => address,
            _ => continue,
        };

        let mut duplicated = false;
        let mut with_arp = false;
        for (j, other) in interfaces.iter().enumerate() {
            if i == j || other.address.as_ref() != Some(address) {
                continue;
            }

            match other.hw_type {
                Some(ARPHRD_ETHER) => duplicated = true,
                Some(_) => with_arp = true,
                None => (),
            }
        }

        if duplicated {
            continue;
        }

        out.push_str(&interface.name);
        out.push_str(" mac ");
        out.push_str(address);
        if with_arp {
            out.push_str(&format!(" arp {}", ARPHRD_ETHER));
        }
        out.push('\n');
    }

    out
}

pub fn hosts(hostname: &str) -> String {
    format!(
        "127.0.0.1\tlocalhost\n\
         127.0.1.1\t{}\n\
         \n\
         # The following lines are desirable for IPv6 capable hosts\n\
         ::1     ip6-localhost ip6-loopback\n\
         fe00::0 ip6-localnet\n\
         ff00::0 ip6-mcastprefix\n\
         ff02::1 ip6-allnodes\n\
         ff02::2 ip6-allrouters\n\
         ff02::3 ip6-allhosts\n",
        hostname
    )
}

fn copy_preserving(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::copy(source, target)?;
    let meta = fs::metadata(source)?;
    filetime::set_file_times(
        target,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
}

fn write(path: &Path, contents: &str) -> io::Result<()> {
    fs::write(path, contents)
        .with_context(|why| format!("failed to write {}: {}", path.display(), why))
}

/// Paths of the live system which the network configuration is read from.
#[derive(Clone, Debug)]
pub struct NetworkHost {
    pub root:          PathBuf,
    pub net_dev:       PathBuf,
    pub sys_class_net: PathBuf,
}

impl Default for NetworkHost {
    fn default() -> Self {
        NetworkHost {
            root:          PathBuf::from("/"),
            net_dev:       PathBuf::from("/proc/net/dev"),
            sys_class_net: PathBuf::from("/sys/class/net"),
        }
    }
}

/// Copy the interface and resolver configuration, and write the host name,
/// hosts table, and persistent interface names of the target.
pub fn configure_network<A: ConfigSource>(
    host: &NetworkHost,
    target: &Path,
    answers: &A,
) -> Result<(), PhaseError> {
    for path in COPIED {
        let source = host.root.join(path);
        if source.exists() {
            let dest = target.join(path);
            copy_preserving(&source, &dest).with_context(|why| {
                format!("failed to copy {} to {}: {}", source.display(), dest.display(), why)
            })?;
        }
    }

    let hostname = answers
        .get("netcfg/get_hostname")
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_HOSTNAME.to_owned());
    info!("setting the host name of the target to {}", hostname);

    let etc = target.join("etc");
    fs::create_dir_all(&etc)?;
    write(&etc.join("hostname"), &format!("{}\n", hostname))?;
    write(&etc.join("hosts"), &hosts(&hostname))?;

    let interfaces = read_interfaces(&host.net_dev, &host.sys_class_net)?;
    write(&etc.join("iftab"), &iftab(&interfaces))?;
    Ok(())
}
