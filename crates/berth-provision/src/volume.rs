//! Persistent block volumes for databases.
//!
//! Safe to repeat on a live server: the volume is attached only when it is
//! not already on this server, and nothing is formatted or mounted once the
//! mount point is a mountpoint. A fresh device is formatted only when it has
//! no filesystem signature. The fstab entry uses the filesystem UUID since
//! device paths change across reattachment.

use berth_cloud::{ComputeProvider, Labels, ManagedResource, Server, Volume, VolumeSpec, Volumes};
use berth_core::{StorageConfig, TimeoutsConfig};
use berth_exec::shell::quote;
use berth_exec::{RemoteRunner, poll_until};
use berth_state::ExecutionTag;
use tracing::info;

use crate::error::{ProvisionError, ProvisionResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedVolume {
    pub name: String,
    pub device: String,
    pub mount_point: String,
    /// False when the volume was already mounted.
    pub newly_mounted: bool,
}

pub struct VolumeRequest<'a> {
    pub name: &'a str,
    pub size_gb: u32,
    pub location: &'a str,
    pub labels: Labels,
}

pub struct VolumeMounter<'a> {
    compute: &'a dyn ComputeProvider,
    runner: &'a RemoteRunner,
    storage: &'a StorageConfig,
    timeouts: &'a TimeoutsConfig,
}

impl<'a> VolumeMounter<'a> {
    pub fn new(
        compute: &'a dyn ComputeProvider,
        runner: &'a RemoteRunner,
        storage: &'a StorageConfig,
        timeouts: &'a TimeoutsConfig,
    ) -> Self {
        Self {
            compute,
            runner,
            storage,
            timeouts,
        }
    }

    pub fn ensure(&self, request: &VolumeRequest<'_>, server: &Server) -> ProvisionResult<MountedVolume> {
        let name = request.name;
        let volume = self.attach(request, server)?;
        let device = device_path(&volume);
        let mount_point = mount_point(self.storage, name);

        self.wait_for_device(name, &device)?;

        if self
            .runner
            .check(&format!("mountpoint -q {}", quote(&mount_point)), ExecutionTag::Volume)?
        {
            info!(volume = name, mount_point = %mount_point, "volume already mounted");
            return Ok(MountedVolume {
                name: name.to_string(),
                device,
                mount_point,
                newly_mounted: false,
            });
        }

        let has_filesystem = self
            .runner
            .check(&format!("blkid -p {}", quote(&device)), ExecutionTag::Volume)?;
        if !has_filesystem {
            info!(volume = name, device = %device, "formatting volume");
            self.runner.run(
                &format!("mkfs.{} -F {}", self.storage.filesystem, quote(&device)),
                ExecutionTag::Volume,
            )?;
        }

        self.runner.run(
            &format!(
                "mkdir -p {mp} && mount {dev} {mp}",
                mp = quote(&mount_point),
                dev = quote(&device)
            ),
            ExecutionTag::Volume,
        )?;
        self.runner
            .run(&fstab_command(&device, &mount_point, &self.storage.filesystem), ExecutionTag::Volume)?;

        info!(volume = name, mount_point = %mount_point, "volume mounted");
        Ok(MountedVolume {
            name: name.to_string(),
            device,
            mount_point,
            newly_mounted: true,
        })
    }

    /// Find or create the volume and attach it here unless it already is.
    fn attach(&self, request: &VolumeRequest<'_>, server: &Server) -> ProvisionResult<Volume> {
        let name = request.name;
        self.runner
            .recorder()
            .step(ExecutionTag::Volume, &format!("volume {name}"), || {
                let spec = VolumeSpec {
                    size_gb: request.size_gb,
                    location: request.location.to_string(),
                    labels: request.labels.clone(),
                };
                let volume = Volumes(self.compute).find_or_create(name, &spec)?;
                if volume.server_id.as_deref() == Some(server.id.as_str()) {
                    return Ok(volume);
                }
                info!(volume = name, server = %server.name, "attaching volume");
                Ok(self.compute.attach_volume(&volume.id, &server.id)?)
            })
    }

    fn wait_for_device(&self, name: &str, device: &str) -> ProvisionResult<()> {
        let attempts = self.timeouts.device_attempts;
        self.runner
            .recorder()
            .step(ExecutionTag::Volume, &format!("wait for {device}"), || {
                let probe = format!("test -b {}", quote(device));
                poll_until(attempts, self.timeouts.poll_interval(), || {
                    self.runner.probe(&probe).map(|ok| ok.then_some(()))
                })?
                .ok_or_else(|| ProvisionError::DeviceTimeout {
                    volume: name.to_string(),
                    device: device.to_string(),
                    attempts,
                })
            })
    }
}

/// Device path of an attached volume. Falls back to the by-id path the
/// provider assigns when it does not report one.
pub fn device_path(volume: &Volume) -> String {
    volume
        .linux_device
        .clone()
        .unwrap_or_else(|| format!("/dev/disk/by-id/scsi-0HC_Volume_{}", volume.id))
}

/// Host directory a named volume is mounted on.
pub fn mount_point(storage: &StorageConfig, name: &str) -> String {
    format!("{}/{name}", storage.mount_root.trim_end_matches('/'))
}

/// Append an fstab line keyed by UUID unless one for that UUID exists.
pub fn fstab_command(device: &str, mount_point: &str, filesystem: &str) -> String {
    format!(
        "uuid=$(blkid -s UUID -o value {dev}) && test -n \"$uuid\" && \
         (grep -q \"UUID=$uuid \" /etc/fstab || echo \"UUID=$uuid {mp} {filesystem} defaults,nofail 0 2\" >> /etc/fstab)",
        dev = quote(device),
        mp = mount_point,
    )
}
