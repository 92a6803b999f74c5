// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::sdk::{Handle, MessageStatus, PackageStatus, NULL_HANDLE};
use std::collections::HashMap;

/// Correlates the sealed copies of one cleartext message with their
/// transport outcomes.
///
/// A client seals one package per entrance-committee member; the message as
/// a whole counts as sent once any copy is sent, failed once every copy has
/// terminally failed, and undetermined otherwise.
#[derive(Debug, Default)]
pub(crate) struct ClearMessageTracker {
    statuses: HashMap<Handle, HashMap<Handle, PackageStatus>>,
}

impl ClearMessageTracker {
    /// Records `enc_handle` as one sealed copy of the message `clr_handle`.
    pub fn track(&mut self, enc_handle: Handle, clr_handle: Handle) {
        let _ = self
            .statuses
            .entry(clr_handle)
            .or_insert_with(HashMap::new)
            .insert(enc_handle, PackageStatus::Invalid);
    }

    /// Applies a package status update, returning the owning message handle
    /// and its aggregated status. Unknown handles resolve to
    /// (`NULL_HANDLE`, `Undef`).
    pub fn update(&mut self, enc_handle: Handle, status: PackageStatus) -> (Handle, MessageStatus) {
        let clr_handle = match self
            .statuses
            .iter()
            .find(|(_, packages)| packages.contains_key(&enc_handle))
            .map(|(clr_handle, _)| *clr_handle)
        {
            Some(clr_handle) => clr_handle,
            None => return (NULL_HANDLE, MessageStatus::Undef),
        };

        if let Some(packages) = self.statuses.get_mut(&clr_handle) {
            let _ = packages.insert(enc_handle, status);
        }
        (clr_handle, self.aggregate(clr_handle))
    }

    /// Drops the record of a resolved message.
    pub fn remove(&mut self, clr_handle: Handle) {
        let _ = self.statuses.remove(&clr_handle);
    }

    fn aggregate(&self, clr_handle: Handle) -> MessageStatus {
        let packages = match self.statuses.get(&clr_handle) {
            Some(packages) => packages,
            None => return MessageStatus::Undef,
        };

        let mut all_failed = true;
        for status in packages.values() {
            if *status == PackageStatus::Sent {
                return MessageStatus::Sent;
            }
            if !status.is_failed() {
                all_failed = false;
            }
        }

        if all_failed {
            MessageStatus::Failed
        } else {
            MessageStatus::Undef
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_sent_wins() {
        let mut tracker = ClearMessageTracker::default();
        tracker.track(11, 1);
        tracker.track(12, 1);

        let (owner, status) = tracker.update(11, PackageStatus::FailedGeneric);
        assert_eq!(owner, 1);
        assert_eq!(status, MessageStatus::Undef);

        let (owner, status) = tracker.update(12, PackageStatus::Sent);
        assert_eq!(owner, 1);
        assert_eq!(status, MessageStatus::Sent);
    }

    #[test]
    fn all_failed_aggregates_to_failed() {
        let mut tracker = ClearMessageTracker::default();
        tracker.track(11, 1);
        tracker.track(12, 1);

        let _ = tracker.update(11, PackageStatus::FailedNetworkError);
        let (owner, status) = tracker.update(12, PackageStatus::FailedTimeout);
        assert_eq!(owner, 1);
        assert_eq!(status, MessageStatus::Failed);
    }

    #[test]
    fn unknown_handle_resolves_to_null() {
        let mut tracker = ClearMessageTracker::default();
        let (owner, status) = tracker.update(99, PackageStatus::Sent);
        assert_eq!(owner, NULL_HANDLE);
        assert_eq!(status, MessageStatus::Undef);
    }

    #[test]
    fn outstanding_copies_keep_the_message_undetermined() {
        let mut tracker = ClearMessageTracker::default();
        tracker.track(11, 1);
        tracker.track(12, 1);

        // One failure, one copy still outstanding.
        let (_, status) = tracker.update(11, PackageStatus::FailedGeneric);
        assert_eq!(status, MessageStatus::Undef);
    }
}
