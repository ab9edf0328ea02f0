//! Open vSwitch link
//!
//! Drives `ovs-vsctl` against the node's OVSDB server. Local nodes use the
//! default unix socket; remote nodes are reached over `tcp:<ip>:<port>`.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{BridgeInfo, DatapathType, LinkConnector, NodeAddress, NodeLink, PortKind};
use crate::error::{FabricError, Result};

/// Default OVSDB TCP port.
pub const DEFAULT_OVSDB_PORT: u16 = 6640;

/// Default switch-management binary.
pub const DEFAULT_OVS_VSCTL: &str = "ovs-vsctl";

/// `ovs-vsctl br-exists` exit status for a missing bridge.
const BR_EXISTS_MISSING: i32 = 2;

/// Where `ovs-vsctl` sends its transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OvsTarget {
    /// Default local unix socket.
    Local,
    /// Remote OVSDB server.
    Tcp(SocketAddr),
}

/// Link to one node's Open vSwitch.
pub struct OvsLink {
    node: String,
    target: OvsTarget,
    binary: String,
    /// Passed to `--timeout`, so the node side gives up too.
    timeout: Duration,
}

impl OvsLink {
    pub fn new(node: impl Into<String>, target: OvsTarget) -> Self {
        Self {
            node: node.into(),
            target,
            binary: DEFAULT_OVS_VSCTL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Global options placed before the command.
    fn global_args(&self) -> Vec<String> {
        let mut args = vec![format!("--timeout={}", self.timeout.as_secs().max(1))];
        if let OvsTarget::Tcp(addr) = &self.target {
            args.push(format!("--db={}", tcp_db(addr)));
        }
        args
    }

    /// Run `ovs-vsctl` and return stdout; non-zero exit is an error.
    async fn run(&self, args: &[String]) -> Result<String> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(self.command_error(args, &output.stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn output(&self, args: &[String]) -> Result<std::process::Output> {
        let mut full = self.global_args();
        full.extend_from_slice(args);

        debug!(node = %self.node, args = ?full, "Running {}", self.binary);

        Command::new(&self.binary)
            .args(&full)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FabricError::Command {
                node: self.node.clone(),
                command: format!("{} {}", self.binary, args.join(" ")),
                stderr: format!("failed to spawn: {}", e),
            })
    }

    fn command_error(&self, args: &[String], stderr: &[u8]) -> FabricError {
        let stderr = String::from_utf8_lossy(stderr).trim().to_string();
        if is_connection_failure(&stderr) {
            return FabricError::unreachable(&self.node, stderr);
        }
        FabricError::Command {
            node: self.node.clone(),
            command: format!("{} {}", self.binary, args.join(" ")),
            stderr,
        }
    }
}

fn tcp_db(addr: &SocketAddr) -> String {
    match addr.ip() {
        IpAddr::V4(ip) => format!("tcp:{}:{}", ip, addr.port()),
        IpAddr::V6(ip) => format!("tcp:[{}]:{}", ip, addr.port()),
    }
}

fn is_connection_failure(stderr: &str) -> bool {
    stderr.contains("database connection failed")
        || stderr.contains("Connection refused")
        || stderr.contains("No route to host")
}

fn is_bridge_exists(stderr: &str) -> bool {
    stderr.contains("already exists")
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[async_trait]
impl NodeLink for OvsLink {
    fn node(&self) -> &str {
        &self.node
    }

    async fn bridge_info(&self, bridge: &str) -> Result<Option<BridgeInfo>> {
        let probe = args(&["br-exists", bridge]);
        let output = self.output(&probe).await?;
        match output.status.code() {
            Some(0) => {}
            Some(BR_EXISTS_MISSING) => return Ok(None),
            _ => return Err(self.command_error(&probe, &output.stderr)),
        }

        // One transaction, one result block per command.
        let stdout = self
            .run(&args(&[
                "get", "bridge", bridge, "datapath_type", "--", "get", "port", bridge, "trunks",
                "--", "list-ports", bridge,
            ]))
            .await?;

        parse_bridge_info(bridge, &stdout)
            .ok_or_else(|| FabricError::Command {
                node: self.node.clone(),
                command: format!("{} get bridge {}", self.binary, bridge),
                stderr: format!("unexpected output: {}", stdout.trim()),
            })
            .map(Some)
    }

    async fn create_bridge(&self, bridge: &str, datapath: DatapathType) -> Result<()> {
        info!(node = %self.node, bridge = %bridge, datapath = %datapath, "Creating bridge");
        let dp = format!("datapath_type={}", datapath);
        let cmd = args(&["add-br", bridge, "--", "set", "bridge", bridge, dp.as_str()]);
        let output = self.output(&cmd).await?;
        if output.status.success() {
            return Ok(());
        }
        // Someone else created the bridge since it was read back.
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_bridge_exists(&stderr) {
            return Err(FabricError::BridgeConflict {
                node: self.node.clone(),
                bridge: bridge.to_string(),
                reason: stderr.trim().to_string(),
            });
        }
        Err(self.command_error(&cmd, &output.stderr))
    }

    async fn attach_interface(&self, bridge: &str, iface: &str, kind: &PortKind) -> Result<()> {
        info!(node = %self.node, bridge = %bridge, iface = %iface, "Attaching interface");
        let mut cmd = args(&["--may-exist", "add-port", bridge, iface]);
        if let PortKind::Dpdk { devargs } = kind {
            let options = format!("options:dpdk-devargs={}", devargs);
            cmd.extend(args(&[
                "--",
                "set",
                "Interface",
                iface,
                "type=dpdk",
                options.as_str(),
            ]));
        }
        self.run(&cmd).await?;
        Ok(())
    }

    async fn set_vlan_trunk(&self, bridge: &str, tags: &[i32]) -> Result<()> {
        let cmd = if tags.is_empty() {
            args(&["clear", "port", bridge, "trunks"])
        } else {
            let list = tags
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let trunks = format!("trunks={}", list);
            args(&["set", "port", bridge, trunks.as_str()])
        };
        debug!(node = %self.node, bridge = %bridge, tags = ?tags, "Setting VLAN trunks");
        self.run(&cmd).await?;
        Ok(())
    }

    async fn delete_bridge(&self, bridge: &str) -> Result<()> {
        info!(node = %self.node, bridge = %bridge, "Deleting bridge");
        self.run(&args(&["--if-exists", "del-br", bridge])).await?;
        Ok(())
    }
}

/// Parse the combined `get datapath_type -- get trunks -- list-ports` output.
fn parse_bridge_info(bridge: &str, stdout: &str) -> Option<BridgeInfo> {
    let mut lines = stdout.lines();
    let datapath_type = DatapathType::parse(lines.next()?);
    let trunks = parse_trunks(lines.next()?)?;
    let ports = lines
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != bridge)
        .map(str::to_string)
        .collect();

    Some(BridgeInfo {
        name: bridge.to_string(),
        datapath_type,
        trunks,
        ports,
    })
}

/// Parse an OVSDB integer set such as `[0, 2048, 4095]`.
fn parse_trunks(s: &str) -> Option<Vec<i32>> {
    let inner = s.trim().strip_prefix('[')?.strip_suffix(']')?;
    let mut tags = inner
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<i32>().ok())
        .collect::<Option<Vec<_>>>()?;
    tags.sort_unstable();
    Some(tags)
}

/// Connector producing [`OvsLink`]s.
pub struct OvsConnector {
    binary: String,
    ovsdb_port: u16,
    local_addresses: HashSet<IpAddr>,
    timeout: Duration,
}

impl OvsConnector {
    pub fn new() -> Self {
        Self {
            binary: DEFAULT_OVS_VSCTL.to_string(),
            ovsdb_port: DEFAULT_OVSDB_PORT,
            local_addresses: HashSet::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_ovsdb_port(mut self, port: u16) -> Self {
        self.ovsdb_port = port;
        self
    }

    /// Addresses that belong to this host; nodes resolving to them use the unix socket.
    pub fn with_local_addresses(mut self, addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        self.local_addresses.extend(addrs);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn target_for(&self, ip: IpAddr) -> OvsTarget {
        if ip.is_loopback() || self.local_addresses.contains(&ip) {
            OvsTarget::Local
        } else {
            OvsTarget::Tcp(SocketAddr::new(ip, self.ovsdb_port))
        }
    }
}

impl Default for OvsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkConnector for OvsConnector {
    async fn connect(&self, address: &NodeAddress) -> Result<Arc<dyn NodeLink>> {
        let link = OvsLink::new(&address.node, self.target_for(address.ip))
            .with_binary(&self.binary)
            .with_timeout(self.timeout);
        Ok(Arc::new(link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_trunks() {
        assert_eq!(parse_trunks("[]"), Some(vec![]));
        assert_eq!(parse_trunks("[4095, 0, 2048]\n"), Some(vec![0, 2048, 4095]));
        assert_eq!(parse_trunks("0, 1"), None);
        assert_eq!(parse_trunks("[a]"), None);
    }

    #[test]
    fn test_parse_bridge_info() {
        let out = "netdev\n[10, 20]\neth1\neth2\n";
        let info = parse_bridge_info("br0", out).unwrap();
        assert_eq!(info.datapath_type, Some(DatapathType::Netdev));
        assert_eq!(info.trunks, vec![10, 20]);
        assert_eq!(info.ports, vec!["eth1".to_string(), "eth2".to_string()]);

        let info = parse_bridge_info("br0", "\"\"\n[]\n").unwrap();
        assert_eq!(info.datapath_type, Some(DatapathType::System));
        assert!(info.ports.is_empty());

        assert!(parse_bridge_info("br0", "system\n").is_none());
    }

    #[test]
    fn test_connector_targets() {
        let local = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let connector = OvsConnector::new()
            .with_ovsdb_port(6641)
            .with_local_addresses([local]);

        assert_eq!(connector.target_for(local), OvsTarget::Local);
        assert_eq!(
            connector.target_for(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            OvsTarget::Local
        );

        let remote = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(
            connector.target_for(remote),
            OvsTarget::Tcp(SocketAddr::new(remote, 6641))
        );
    }

    #[test]
    fn test_global_args_for_remote() {
        let addr: SocketAddr = "10.0.0.2:6640".parse().unwrap();
        let link = OvsLink::new("node-2", OvsTarget::Tcp(addr)).with_timeout(Duration::from_secs(5));
        assert_eq!(
            link.global_args(),
            vec!["--timeout=5".to_string(), "--db=tcp:10.0.0.2:6640".to_string()]
        );

        let v6: SocketAddr = "[fd00::2]:6640".parse().unwrap();
        assert_eq!(tcp_db(&v6), "tcp:[fd00::2]:6640");
    }

    #[test]
    fn test_bridge_exists_detection() {
        assert!(is_bridge_exists(
            "ovs-vsctl: cannot create a bridge named br0 because a bridge named br0 already exists\n"
        ));
        assert!(!is_bridge_exists("ovs-vsctl: no bridge named br0"));
    }

    /// Stand-in for ovs-vsctl that fails like `add-br` on an existing bridge.
    fn existing_bridge_binary(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("ovs-vsctl");
        std::fs::write(
            &path,
            "#!/bin/sh\necho \"ovs-vsctl: cannot create a bridge named br0 because a bridge named br0 already exists\" >&2\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_create_over_existing_bridge_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let link = OvsLink::new("node-1", OvsTarget::Local)
            .with_binary(existing_bridge_binary(dir.path()));

        let err = link
            .create_bridge("br0", DatapathType::System)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FabricError::BridgeConflict { ref node, ref bridge, .. } if node == "node-1" && bridge == "br0"
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_command_error() {
        let link = OvsLink::new("node-1", OvsTarget::Local).with_binary("/nonexistent/ovs-vsctl");
        let err = link.delete_bridge("br0").await.unwrap_err();
        assert!(matches!(err, FabricError::Command { node, .. } if node == "node-1"));
    }
}
