use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// CPU and memory amounts used for fit and scoring decisions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceQuantities {
    /// Thousandths of a core
    pub cpu_millicores: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

/// Binary and decimal suffixes accepted on quantities, longest first
const SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("m", 1e-3),
];

/// Split a quantity like "1.5Gi" into its number and multiplier
fn split_quantity(s: &str) -> Result<(f64, f64), String> {
    let s = s.trim();
    let (digits, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|d| (d, *mult)))
        .unwrap_or((s, 1.0));

    let value: f64 = digits
        .parse()
        .map_err(|_| format!("Invalid quantity: {:?}", s))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("Quantity out of range: {:?}", s));
    }
    Ok((value, multiplier))
}

impl ResourceQuantities {
    /// CPU in millicores: "2" is 2000, "250m" is 250, "0.5" is 500
    pub fn parse_cpu(s: &str) -> Result<i64, String> {
        let (value, multiplier) = split_quantity(s)?;
        Ok((value * multiplier * 1000.0).round() as i64)
    }

    /// Memory in bytes: "128Mi", "1G", "1024"
    pub fn parse_memory(s: &str) -> Result<i64, String> {
        let (value, multiplier) = split_quantity(s)?;
        Ok((value * multiplier).ceil() as i64)
    }

    /// Read CPU and memory from a k8s resource map; unparseable entries count as zero
    pub fn from_resource_map(resources: &BTreeMap<String, Quantity>) -> Self {
        let cpu_millicores = resources
            .get("cpu")
            .and_then(|q| Self::parse_cpu(&q.0).ok())
            .unwrap_or(0);

        let memory_bytes = resources
            .get("memory")
            .and_then(|q| Self::parse_memory(&q.0).ok())
            .unwrap_or(0);

        Self {
            cpu_millicores,
            memory_bytes,
        }
    }

    /// Sum of the resource requests of every container in the pod
    pub fn pod_requests(pod: &Pod) -> Self {
        let mut total = Self::default();
        let Some(spec) = &pod.spec else {
            return total;
        };

        for container in &spec.containers {
            if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
                total += Self::from_resource_map(requests);
            }
        }
        total
    }

    /// Allocatable capacity reported by the node, falling back to capacity
    pub fn node_allocatable(node: &Node) -> Self {
        let status = match &node.status {
            Some(s) => s,
            None => return Self::default(),
        };

        status
            .allocatable
            .as_ref()
            .or(status.capacity.as_ref())
            .map(Self::from_resource_map)
            .unwrap_or_default()
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_millicores == 0 && self.memory_bytes == 0
    }
}

impl AddAssign for ResourceQuantities {
    fn add_assign(&mut self, other: Self) {
        self.cpu_millicores = self.cpu_millicores.saturating_add(other.cpu_millicores);
        self.memory_bytes = self.memory_bytes.saturating_add(other.memory_bytes);
    }
}
