// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Read-only introspection helpers backing the optional debug-filesystem
//! collaborator named in spec §6. Nothing here mutates channel state.

use std::fmt::Write as _;

/// Formats `bytes` as a classic 16-bytes-per-row hex dump with an offset
/// column, e.g. `00000010  01 02 03 04 ...`.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", row * 16);
        for b in chunk {
            let _ = write!(out, "{b:02x} ");
        }
        out.push('\n');
    }
    out
}

/// Serializes a value with `postcard` for a debugfs-style consumer that
/// wants a compact, self-describing blob rather than formatted text — the
/// same crate the teacher's mailbox-interface uses to encode its RPC
/// payloads, reused here for the introspection surface instead.
pub fn encode_snapshot<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_allocvec(value)
}
