// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::client::command::PendingCommand;

/// Number of hash buckets; commands land in bucket `itt % BUCKETS`.
pub const BUCKETS: usize = 32;

/// Commands whose request is fully on the wire, keyed by task tag.
#[derive(Debug, Default)]
pub struct CommandTable {
    buckets: [Vec<Box<PendingCommand>>; BUCKETS],
    len: usize,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn bucket(itt: u32) -> usize {
        itt as usize % BUCKETS
    }

    pub fn insert(&mut self, cmd: Box<PendingCommand>) {
        self.buckets[Self::bucket(cmd.itt)].push(cmd);
        self.len += 1;
    }

    pub fn get_mut(&mut self, itt: u32) -> Option<&mut PendingCommand> {
        self.buckets[Self::bucket(itt)]
            .iter_mut()
            .find(|c| c.itt == itt)
            .map(|c| &mut **c)
    }

    pub fn remove(&mut self, itt: u32) -> Option<Box<PendingCommand>> {
        let bucket = &mut self.buckets[Self::bucket(itt)];
        let pos = bucket.iter().position(|c| c.itt == itt)?;
        self.len -= 1;
        Some(bucket.swap_remove(pos))
    }

    /// Empties the table, oldest task tags first.
    pub fn remove_all(&mut self) -> Vec<Box<PendingCommand>> {
        let mut all: Vec<_> = self.buckets.iter_mut().flat_map(|b| b.drain(..)).collect();
        all.sort_by_key(|c| c.cmd_sn);
        self.len = 0;
        all
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
