use super::{ClusterKind, ClusterType};

pub struct AwsCluster;
pub struct GoogleCluster;
pub struct MaasCluster;
pub struct LxdCluster;
pub struct ManualCluster;

impl ClusterType for AwsCluster {
    fn kind(&self) -> ClusterKind { ClusterKind::Aws }
    fn supported_series(&self) -> &'static [&'static str] { &["trusty", "xenial", "bionic"] }
}

impl ClusterType for GoogleCluster {
    fn kind(&self) -> ClusterKind { ClusterKind::Google }
    fn supported_series(&self) -> &'static [&'static str] { &["trusty", "xenial", "bionic"] }
}

impl ClusterType for MaasCluster {
    fn kind(&self) -> ClusterKind { ClusterKind::Maas }
    fn supported_series(&self) -> &'static [&'static str] { &["trusty", "xenial", "bionic", "focal"] }
}

impl ClusterType for LxdCluster {
    fn kind(&self) -> ClusterKind { ClusterKind::Lxd }
    fn cloud(&self) -> &'static str { "localhost" }
    fn supported_series(&self) -> &'static [&'static str] { &["trusty", "xenial", "bionic", "focal", "jammy"] }
}

impl ClusterType for ManualCluster {
    fn kind(&self) -> ClusterKind { ClusterKind::Manual }
    fn supported_series(&self) -> &'static [&'static str] { &["xenial", "bionic"] }
    // machines are pre-provisioned hosts without container networking
    fn supports_lxd(&self) -> bool { false }
}
