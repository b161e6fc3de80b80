use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Map,
    Value,
};
use strum::{
    Display,
    EnumIter,
    EnumString,
};

/// The host collector types understood by the `collect` binary running inside
/// the per-node pod. The serialized names are the keys of a `HostCollect`
/// entry.
#[derive(Debug, Clone, Copy, Display, EnumIter, EnumString, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum TaskKind {
    Cpu,
    Memory,
    TcpLoadBalancer,
    HttpLoadBalancer,
    TcpPortStatus,
    UdpPortStatus,
    Ipv4Interfaces,
    SubnetAvailable,
    DiskUsage,
    Http,
    Time,
    BlockDevices,
    SystemPackages,
    KernelModules,
    TcpConnect,
    FilesystemPerformance,
    Certificate,
    CertificatesCollection,
    HostServices,
    #[serde(rename = "hostOS")]
    #[strum(to_string = "hostOS")]
    HostOs,
    Run,
    Copy,
    KernelConfigs,
    Journald,
    Cgroups,
    Dns,
    NetworkNamespaceConnectivity,
    Sysctl,
    Tls,
}

impl TaskKind {
    pub fn default_title(&self) -> &'static str {
        match self {
            TaskKind::Cpu => "CPU Info",
            TaskKind::Memory => "Amount of Memory",
            TaskKind::TcpLoadBalancer => "TCP Load Balancer",
            TaskKind::HttpLoadBalancer => "HTTP Load Balancer",
            TaskKind::TcpPortStatus => "TCP Port Status",
            TaskKind::UdpPortStatus => "UDP Port Status",
            TaskKind::Ipv4Interfaces => "IPv4 Interfaces",
            TaskKind::SubnetAvailable => "Subnet Available",
            TaskKind::DiskUsage => "Disk Usage",
            TaskKind::Http => "HTTP Request",
            TaskKind::Time => "Time",
            TaskKind::BlockDevices => "Block Devices",
            TaskKind::SystemPackages => "System Packages",
            TaskKind::KernelModules => "Kernel Modules",
            TaskKind::TcpConnect => "TCP Connection Attempt",
            TaskKind::FilesystemPerformance => "Filesystem Performance",
            TaskKind::Certificate => "Host Certificate Validity",
            TaskKind::CertificatesCollection => "Host Certificates Collection",
            TaskKind::HostServices => "Host Services",
            TaskKind::HostOs => "Host OS Info",
            TaskKind::Run => "Run Host",
            TaskKind::Copy => "copy",
            TaskKind::KernelConfigs => "kernel-configs",
            TaskKind::Journald => "journald",
            TaskKind::Cgroups => "cgroups",
            TaskKind::Dns => "dns",
            TaskKind::NetworkNamespaceConnectivity => "Host Network Namespace Connectivity",
            TaskKind::Sysctl => "Sysctl",
            TaskKind::Tls => "TLS",
        }
    }
}

/// What to run on every node: a collector type plus its free-form
/// parameters. Never mutated after it has been handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub kind: TaskKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_name: Option<String>,
    #[serde(default)]
    pub exclude: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl TaskDescriptor {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            collector_name: None,
            exclude: false,
            params: Map::new(),
        }
    }

    pub fn with_collector_name(mut self, name: impl Into<String>) -> Self {
        self.collector_name = Some(name.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn title(&self) -> &str {
        match self.collector_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self.kind.default_title(),
        }
    }

    pub fn is_excluded(&self) -> bool {
        self.exclude
    }

    /// Builds the `HostCollect` entry for this task, e.g.
    /// `{"diskUsage": {"collectorName": "root", "path": "/"}}`.
    ///
    /// `collectorName` and `exclude` always win over same-named params.
    pub fn to_collector_entry(&self) -> Value {
        let mut body = self.params.clone();
        if let Some(name) = self.collector_name.as_ref().filter(|name| !name.is_empty()) {
            body.insert("collectorName".to_string(), Value::String(name.clone()));
        }
        if self.exclude {
            body.insert("exclude".to_string(), Value::Bool(true));
        } else {
            body.remove("exclude");
        }

        let mut entry = Map::new();
        entry.insert(self.kind.to_string(), Value::Object(body));
        Value::Object(entry)
    }
}
