// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
use std::io::Result;

fn main() -> Result<()> {
    let protoc =
        protoc_bin_vendored::protoc_bin_path().expect("failed to locate vendored protoc binary");
    unsafe {
        std::env::set_var("PROTOC", &protoc);
    }

    // Compile the runner protocol (job stream, config stream, operation state)
    prost_build::compile_protos(&["proto/runner.proto"], &["proto/"])?;

    Ok(())
}
