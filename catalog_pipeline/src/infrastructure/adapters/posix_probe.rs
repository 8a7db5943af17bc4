// /////////////////////////////////////////////////////////////////////////////
// Catalog Pipeline RS
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # POSIX Filesystem Probe
//!
//! [`FsProbe`] implementation for plain POSIX filesystems. Identities are
//! `(device, inode)` pairs from `lstat`; id-to-path resolution, striping and
//! archive status are unsupported and advertised as such, so the enrichment
//! stage never asks for them.

use catalog_pipeline_domain::{EntryId, FsKind, FsProbe, FsProbeError, FsStat, HsmStatus, StripeInfo};
use std::fs::Metadata;
use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

/// Probe over the mounted POSIX namespace.
#[derive(Debug, Default, Clone)]
pub struct PosixFsProbe;

impl PosixFsProbe {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(err: std::io::Error) -> FsProbeError {
    match err.kind() {
        ErrorKind::NotFound => FsProbeError::Missing,
        // ESTALE has no ErrorKind; match the raw code
        _ if err.raw_os_error() == Some(libc::ESTALE) => FsProbeError::Missing,
        _ => FsProbeError::Io(err.to_string()),
    }
}

fn kind_of(metadata: &Metadata) -> FsKind {
    let ft = metadata.file_type();
    if ft.is_file() {
        FsKind::File
    } else if ft.is_dir() {
        FsKind::Directory
    } else if ft.is_symlink() {
        FsKind::Symlink
    } else if ft.is_fifo() {
        FsKind::Fifo
    } else if ft.is_socket() {
        FsKind::Socket
    } else if ft.is_block_device() {
        FsKind::BlockDevice
    } else {
        FsKind::CharDevice
    }
}

impl FsProbe for PosixFsProbe {
    fn path_to_id(&self, path: &str) -> Result<EntryId, FsProbeError> {
        let metadata = std::fs::symlink_metadata(path).map_err(io_error)?;
        Ok(EntryId::from_posix(metadata.dev(), metadata.ino()))
    }

    fn id_to_path(&self, _id: &EntryId) -> Result<String, FsProbeError> {
        Err(FsProbeError::Unsupported)
    }

    fn build_id_path(&self, _id: &EntryId) -> Option<String> {
        None
    }

    fn stat(&self, path: &str) -> Result<FsStat, FsProbeError> {
        let metadata = std::fs::symlink_metadata(path).map_err(io_error)?;
        Ok(FsStat {
            kind: kind_of(&metadata),
            owner: metadata.uid().to_string(),
            group: metadata.gid().to_string(),
            size: metadata.len(),
            last_access: metadata.atime(),
            last_mod: metadata.mtime(),
            change_time: metadata.ctime(),
            nlink: metadata.nlink(),
        })
    }

    fn get_stripe(&self, _path: &str) -> Result<(StripeInfo, Vec<u32>), FsProbeError> {
        Err(FsProbeError::Unsupported)
    }

    fn get_hsm_status(&self, _path: &str) -> Result<HsmStatus, FsProbeError> {
        Err(FsProbeError::Unsupported)
    }

    fn supports_stripes(&self) -> bool {
        false
    }

    fn supports_hsm(&self) -> bool {
        false
    }
}
