//! Multiple queues manager.
//!
//! Holds every queue the session knows about, ordered least- to
//! most-recently used, and loads the selected queue into the player.
//! Methods do not reload the player unless stated otherwise. Persistence
//! is asynchronous and coalesced through [`super::persist::SaveScheduler`];
//! mutations never wait on the database.

use rand::seq::SliceRandom;
use rivertune_common::model::{QueueKind, TrackMetadata};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::playback::persist::{SaveJob, SaveScheduler};
use crate::playback::player::MediaPlayer;

/// Upper bound on remembered queues; the least-recently-used queue is
/// evicted first.
pub const MAX_QUEUES: usize = 20;

/// One named queue: an ordered track list with its own playback position
/// and shuffle state.
///
/// `queue` is storage order. When `shuffled` is set, traversal order is
/// given by each track's `shuffle_index`, which the board keeps as a dense
/// permutation of `0..len`. `queue_pos` always indexes storage order, even
/// while shuffled.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiQueue {
    pub id: Uuid,
    /// Display title; also the soft key used to match incoming adds against
    /// existing queues.
    pub title: String,
    pub kind: QueueKind,
    pub queue: Vec<TrackMetadata>,
    pub shuffled: bool,
    /// Storage-order index of the current track.
    pub queue_pos: usize,
    /// Position of this queue in the master list.
    pub index: usize,
    /// Continuation marker for radio queues (track id seeding the next
    /// page); None for finite queues.
    pub playlist_id: Option<String>,
}

impl MultiQueue {
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Traversal-order copy of the track list, honoring shuffle state.
    pub fn shuffled_view(&self) -> Vec<TrackMetadata> {
        let mut items = self.queue.clone();
        if self.shuffled {
            items.sort_by_key(|t| t.shuffle_index);
        }
        items
    }

    /// Current position in traversal order.
    pub fn queue_pos_shuffled(&self) -> usize {
        if self.queue.is_empty() {
            return 0;
        }
        let pos = self.queue_pos.min(self.queue.len() - 1);
        if self.shuffled {
            self.queue[pos].shuffle_index
        } else {
            pos
        }
    }

    /// Point `queue_pos` at the track sitting at `traversal` in traversal
    /// order.
    pub fn set_current_pos(&mut self, traversal: usize) {
        if self.queue.is_empty() {
            return;
        }
        if self.queue_pos >= self.queue.len() {
            self.queue_pos = self.queue.len() - 1;
        }
        if self.queue_pos_shuffled() == traversal {
            return;
        }
        self.queue_pos = if self.shuffled {
            self.queue
                .iter()
                .position(|t| t.shuffle_index == traversal)
                .unwrap_or(0)
        } else {
            traversal.min(self.queue.len() - 1)
        };
    }

    /// Total duration of all tracks, in seconds. Unknown durations count 0.
    pub fn total_duration_secs(&self) -> i64 {
        self.queue.iter().map(|t| t.duration_secs.max(0)).sum()
    }

    fn replace_all(&mut self, tracks: Vec<TrackMetadata>) {
        self.queue = tracks;
    }

    /// Reassign `shuffle_index` densely, preserving relative traversal
    /// order.
    fn renormalize_shuffle_indexes(&mut self) {
        let mut order: Vec<usize> = (0..self.queue.len()).collect();
        order.sort_by_key(|&i| self.queue[i].shuffle_index);
        for (traversal, storage) in order.into_iter().enumerate() {
            self.queue[storage].shuffle_index = traversal;
        }
    }
}

/// Options for [`QueueBoard::add_queue`].
#[derive(Debug, Clone, Copy)]
pub struct AddQueueOptions {
    /// Load the queue shuffled
    pub shuffled: bool,
    /// Force an insert instead of jumping to an existing track when the
    /// incoming list is a subset of the queue
    pub force_insert: bool,
    /// Replace all items in the queue; overrides `force_insert` and `delta`
    pub replace: bool,
    /// Append only genuinely new tracks instead of spilling into an
    /// extension queue
    pub delta: bool,
    /// The queue supports continuation
    pub is_radio: bool,
    /// Position to instantiate a new queue with; ignored for existing
    /// queues
    pub start_index: usize,
}

impl Default for AddQueueOptions {
    fn default() -> Self {
        Self {
            shuffled: false,
            force_insert: false,
            replace: false,
            delta: true,
            is_radio: false,
            start_index: 0,
        }
    }
}

/// Kotlin-style list move: take the element at `from` and reinsert it at
/// `to`.
fn vec_move<T>(items: &mut Vec<T>, from: usize, to: usize) {
    if from >= items.len() || from == to {
        return;
    }
    let item = items.remove(from);
    let to = to.min(items.len());
    items.insert(to, item);
}

/// The master list of queues plus the pointer at the current one.
///
/// Single-writer: the orchestrator serializes all mutation; nothing here
/// takes its own lock.
pub struct QueueBoard {
    queues: Vec<MultiQueue>,
    master_index: Option<usize>,
    saver: SaveScheduler,
}

impl QueueBoard {
    pub fn new(saver: SaveScheduler) -> Self {
        Self {
            queues: Vec::new(),
            master_index: None,
            saver,
        }
    }

    /// Rebuild the board from persisted queues (already in master-list
    /// order); the most recent queue becomes current.
    pub fn with_queues(queues: Vec<MultiQueue>, saver: SaveScheduler) -> Self {
        let master_index = queues.len().checked_sub(1);
        let mut board = Self {
            queues,
            master_index,
            saver,
        };
        board.regenerate_indexes();
        board
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn master_index(&self) -> Option<usize> {
        self.master_index
    }

    /// Copies of all queues, in master-list order.
    pub fn all_queues(&self) -> Vec<MultiQueue> {
        self.queues.clone()
    }

    pub fn queue_at(&self, index: usize) -> Option<&MultiQueue> {
        self.queues.get(index)
    }

    pub fn current_queue(&self) -> Option<&MultiQueue> {
        self.master_index.and_then(|i| self.queues.get(i))
    }

    /// Whether the current queue plays shuffled (false when there is none).
    pub fn current_shuffled(&self) -> bool {
        self.current_queue().map(|q| q.shuffled).unwrap_or(false)
    }

    fn index_of(&self, id: Uuid) -> Option<usize> {
        self.queues.iter().position(|q| q.id == id)
    }

    fn regenerate_indexes(&mut self) {
        for (index, q) in self.queues.iter_mut().enumerate() {
            q.index = index;
        }
    }

    /// Move the queue at `index` to the end of the master list, marking it
    /// most recently used, and track it as the current queue. Returns the
    /// queue's new index.
    pub fn bubble_up(&mut self, index: usize) -> usize {
        if index + 1 == self.queues.len() {
            return index;
        }
        let item = self.queues.remove(index);
        self.queues.push(item);
        self.master_index = Some(self.queues.len() - 1);
        self.regenerate_indexes();
        self.save_all_queues();
        self.queues.len() - 1
    }

    /// Add a new queue, or add to a queue when one with this title exists.
    ///
    /// Behavior, in priority order:
    /// 1. No queue with this title: added as a new queue.
    /// 2. `replace`: all contents overwritten, position reset.
    /// 3. Incoming tracks are a subset with matching size and not
    ///    `force_insert`: jump to the requested track, no content change.
    /// 4. `delta`: only genuinely new tracks appended, position updated.
    /// 5. The match (or a sibling) is an extension queue: append
    ///    unconditionally, position untouched.
    /// 6. Otherwise spawn an extension queue seeded from the match's
    ///    traversal order plus the new tracks.
    ///
    /// Returns whether a full reload of player items is required; case 5
    /// enqueues without interrupting playback.
    pub fn add_queue(
        &mut self,
        title: &str,
        tracks: Vec<TrackMetadata>,
        player: &dyn MediaPlayer,
        opts: AddQueueOptions,
    ) -> bool {
        debug!(
            "Adding to queue \"{}\": {} tracks, force_insert/replace/delta/start_index = {}/{}/{}/{}",
            title,
            tracks.len(),
            opts.force_insert,
            opts.replace,
            opts.delta,
            opts.start_index
        );

        if tracks.is_empty() {
            return false;
        }

        let matched = self.queues.iter().position(|q| q.title == title);
        let Some(match_idx) = matched else {
            return self.insert_new_queue(title, tracks, opts);
        };

        let sibling_ext = {
            let parent_id = self.queues[match_idx].id;
            self.queues
                .iter()
                .position(|q| q.kind == QueueKind::Extension { parent: parent_id })
        };

        if opts.replace {
            debug!("Adding to queue: replacing all queue items");
            let mut tracks = tracks;
            for (i, t) in tracks.iter_mut().enumerate() {
                t.shuffle_index = i;
            }
            let q = &mut self.queues[match_idx];
            let qid = q.id;
            q.replace_all(tracks);
            q.queue_pos = opts.start_index.min(q.len().saturating_sub(1));
            if opts.shuffled {
                self.shuffle(match_idx, false, true);
            }
            // shuffling bubbles the queue, so re-locate it
            let idx = self.index_of(qid).unwrap_or(match_idx);
            self.save_queue_tracks(idx);
            self.bubble_up(idx);
            return true;
        }

        let is_subset = {
            let q = &self.queues[match_idx];
            tracks.iter().all(|t| q.queue.iter().any(|e| e.id == t.id))
        };
        if is_subset && self.queues[match_idx].len() == tracks.len() && !opts.force_insert {
            // The same logical queue; jump to the requested track instead
            // of mutating contents.
            debug!("Adding to queue: jump only");
            let target_id = tracks
                .get(opts.start_index)
                .map(|t| t.id.clone())
                .unwrap_or_else(|| tracks[0].id.clone());
            let q = &mut self.queues[match_idx];
            let qid = q.id;
            if let Some(found) = q.queue.iter().position(|t| t.id == target_id) {
                q.queue_pos = found;
            }
            if opts.shuffled {
                self.shuffle(match_idx, false, true);
            }
            let idx = self.index_of(qid).unwrap_or(match_idx);
            self.bubble_up(idx);
            return true;
        }

        if opts.delta {
            debug!("Adding to queue: delta additive");
            let target_id = tracks.get(opts.start_index).map(|t| t.id.clone());
            let q = &mut self.queues[match_idx];
            let qid = q.id;
            let mut next_shuffle = q.len();
            for mut t in tracks {
                if q.queue.iter().any(|e| e.id == t.id) {
                    continue;
                }
                // appended tracks go to the end of the traversal order
                t.shuffle_index = next_shuffle;
                next_shuffle += 1;
                q.queue.push(t);
            }
            if let Some(target_id) = target_id {
                if let Some(found) = q.queue.iter().position(|t| t.id == target_id) {
                    q.queue_pos = found;
                }
            }
            if opts.shuffled {
                self.shuffle(match_idx, false, true);
            }
            let idx = self.index_of(qid).unwrap_or(match_idx);
            self.save_queue_tracks(idx);
            self.bubble_up(idx);
            return true;
        }

        let ext_idx = if self.queues[match_idx].kind.is_extension() {
            Some(match_idx)
        } else {
            sibling_ext
        };
        if let Some(ext_idx) = ext_idx {
            // Additions go to the extension queue without touching the
            // current position; playback continues undisturbed.
            debug!("Adding to queue: extension queue additive");
            self.add_songs_to_queue(ext_idx, usize::MAX, tracks, player, false, false);
            // add_songs_to_queue bubbled the extension to the end
            let ext_idx = self.queues.len() - 1;
            if opts.shuffled {
                self.shuffle(ext_idx, false, true);
            }
            self.save_queue_tracks(ext_idx);
            if let Some(base) = self.queues.iter().position(|q| q.title == title && !q.kind.is_extension()) {
                self.bubble_up(base);
            }
            return false;
        }

        // Spawn a brand-new extension queue seeded from the base queue's
        // traversal order plus the new tracks. Base data is captured first:
        // the eviction below may remove the base queue itself.
        debug!("Adding to queue: extension queue creation (and additive)");
        let (base_id, mut seeded, base_pos) = {
            let base = &self.queues[match_idx];
            (base.id, base.shuffled_view(), base.queue_pos_shuffled())
        };
        if self.queues.len() >= MAX_QUEUES {
            self.delete_queue(0);
        }
        seeded.extend(tracks);
        // extension queues are always created un-shuffled
        for (i, t) in seeded.iter_mut().enumerate() {
            t.shuffle_index = i;
        }
        let new_queue = MultiQueue {
            id: Uuid::new_v4(),
            title: title.to_string(),
            kind: QueueKind::Extension { parent: base_id },
            queue: seeded,
            shuffled: false,
            queue_pos: base_pos,
            index: self.queues.len(),
            playlist_id: None,
        };
        self.queues.push(new_queue);
        let new_idx = self.queues.len() - 1;
        if opts.shuffled {
            self.shuffle(new_idx, false, true);
        }
        self.save_queue_tracks(new_idx);
        self.master_index = Some(new_idx);
        true
    }

    fn insert_new_queue(
        &mut self,
        title: &str,
        mut tracks: Vec<TrackMetadata>,
        opts: AddQueueOptions,
    ) -> bool {
        if self.queues.len() >= MAX_QUEUES {
            self.delete_queue(0);
        }
        for (i, t) in tracks.iter_mut().enumerate() {
            t.shuffle_index = i;
        }
        let playlist_id = if opts.is_radio {
            tracks.last().map(|t| t.id.clone())
        } else {
            None
        };
        let queue_pos = opts.start_index.min(tracks.len().saturating_sub(1));
        let new_queue = MultiQueue {
            id: Uuid::new_v4(),
            title: title.to_string(),
            kind: QueueKind::Primary,
            queue: tracks,
            shuffled: false,
            queue_pos,
            index: self.queues.len(),
            playlist_id,
        };
        self.queues.push(new_queue);
        let new_idx = self.queues.len() - 1;
        if opts.shuffled {
            self.shuffle(new_idx, false, true);
        }
        self.save_queue_tracks(new_idx);
        self.master_index = Some(new_idx);
        true
    }

    /// Append tracks to the end of the current queue and update the player.
    pub fn enqueue_end(
        &mut self,
        tracks: Vec<TrackMetadata>,
        player: &dyn MediaPlayer,
        is_radio: bool,
    ) {
        if let Some(index) = self.master_index {
            self.add_songs_to_queue(index, usize::MAX, tracks, player, true, is_radio);
        }
    }

    /// Insert tracks into a queue at a clamped traversal position and
    /// reload the player (seamlessly when possible).
    pub fn add_songs_to_queue(
        &mut self,
        queue_idx: usize,
        pos: usize,
        tracks: Vec<TrackMetadata>,
        player: &dyn MediaPlayer,
        save: bool,
        is_radio: bool,
    ) {
        if tracks.is_empty() || queue_idx >= self.queues.len() {
            return;
        }
        let count = tracks.len();
        {
            let q = &mut self.queues[queue_idx];
            let pos = pos.min(q.len());
            debug!("Inserting {} tracks at position {}", count, pos);

            if q.shuffled {
                // make room in the traversal order
                for t in q.queue.iter_mut() {
                    if t.shuffle_index >= pos {
                        t.shuffle_index += count;
                    }
                }
            }
            let mut tracks = tracks;
            for (i, t) in tracks.iter_mut().enumerate() {
                t.shuffle_index = pos + i;
            }

            if q.shuffled {
                q.queue.extend(tracks);
            } else {
                // storage insertion shifts the current track when it lands
                // at or before it
                if pos <= q.queue_pos && !q.queue.is_empty() {
                    q.queue_pos += count;
                }
                let tail = q.queue.split_off(pos);
                q.queue.extend(tracks);
                q.queue.extend(tail);
                // keep the ignored indexes dense for the next shuffle
                for (i, t) in q.queue.iter_mut().enumerate() {
                    t.shuffle_index = i;
                }
            }

            if is_radio {
                q.playlist_id = q.queue.last().map(|t| t.id.clone());
            }
        }

        self.set_current_queue(Some(queue_idx), player, true);
        // the queue bubbled to the end of the master list
        let queue_idx = self.queues.len() - 1;
        if save {
            self.save_queue_tracks(queue_idx);
        }
    }

    /// Remove the track at `index` (traversal order) from the current
    /// queue.
    pub fn remove_current_queue_song(&mut self, index: usize) -> bool {
        match self.master_index {
            Some(queue_idx) => self.remove_song(queue_idx, index),
            None => false,
        }
    }

    /// Remove the track at `index` (traversal order) from a queue.
    pub fn remove_song(&mut self, queue_idx: usize, index: usize) -> bool {
        let Some(q) = self.queues.get_mut(queue_idx) else {
            return false;
        };
        if q.queue.is_empty() {
            return false;
        }
        let cur = q.queue_pos_shuffled();

        let removed = if q.shuffled {
            match q.queue.iter().position(|t| t.shuffle_index == index) {
                Some(storage) => {
                    let track = q.queue.remove(storage);
                    debug!("Removing song: {}", track.title);
                    true
                }
                None => false,
            }
        } else if index < q.queue.len() {
            q.queue.remove(index);
            true
        } else {
            false
        };
        if !removed {
            return false;
        }
        q.renormalize_shuffle_indexes();

        // adjust the current position only if the removal affects it
        let mut new_cur = cur as i64;
        if index < cur {
            new_cur -= 1;
        } else if index == cur {
            new_cur += 1;
        }
        let max = q.len().saturating_sub(1) as i64;
        let new_cur = new_cur.clamp(0, max) as usize;
        q.set_current_pos(new_cur);
        if q.queue.is_empty() {
            q.queue_pos = 0;
        }

        self.save_queue_tracks(queue_idx);
        true
    }

    /// Delete a queue. Returns the number of queues left.
    pub fn delete_queue(&mut self, queue_idx: usize) -> usize {
        if queue_idx >= self.queues.len() {
            warn!("Cannot find queue at index {}", queue_idx);
            return self.queues.len();
        }
        let removed = self.queues.remove(queue_idx);
        debug!("Deleting queue {}", removed.title);
        self.master_index = match self.master_index {
            _ if self.queues.is_empty() => None,
            Some(m) if m == queue_idx => Some(self.queues.len() - 1),
            Some(m) if m > queue_idx => Some(m - 1),
            other => other,
        };
        self.regenerate_indexes();
        self.saver.delete_queue(removed.id);
        self.queues.len()
    }

    /// Shuffle the current queue.
    pub fn shuffle_current(&mut self, preserve_current: bool) -> usize {
        match self.master_index {
            Some(index) => self.shuffle(index, preserve_current, false),
            None => 0,
        }
    }

    /// Shuffle a queue: assign a fresh uniform permutation to the tracks'
    /// shuffle indexes.
    ///
    /// With `preserve_current` the currently playing track is swapped into
    /// traversal slot 0 so playback does not visibly jump. Returns the new
    /// position tracker.
    pub fn shuffle(&mut self, queue_idx: usize, preserve_current: bool, bypass_save: bool) -> usize {
        let Some(q) = self.queues.get_mut(queue_idx) else {
            return 0;
        };
        if q.queue.is_empty() {
            return 0;
        }
        debug!("Shuffling queue {}", q.title);

        let current_storage = q.queue_pos.min(q.queue.len() - 1);
        let mut permutation: Vec<usize> = (0..q.queue.len()).collect();
        permutation.shuffle(&mut rand::thread_rng());
        for (storage, t) in q.queue.iter_mut().enumerate() {
            t.shuffle_index = permutation[storage];
        }

        if preserve_current {
            let zero_storage = q
                .queue
                .iter()
                .position(|t| t.shuffle_index == 0)
                .unwrap_or(current_storage);
            if zero_storage != current_storage {
                q.queue[zero_storage].shuffle_index = q.queue[current_storage].shuffle_index;
                q.queue[current_storage].shuffle_index = 0;
            }
            q.queue_pos = current_storage;
        } else {
            q.queue_pos = q
                .queue
                .iter()
                .position(|t| t.shuffle_index == 0)
                .unwrap_or(0);
        }
        q.shuffled = true;
        let pos = q.queue_pos;

        if !bypass_save {
            self.save_queue_tracks(queue_idx);
        }
        self.bubble_up(queue_idx);
        pos
    }

    /// Un-shuffle the current queue.
    pub fn un_shuffle_current(&mut self) -> usize {
        match self.master_index {
            Some(index) => self.un_shuffle(index),
            None => 0,
        }
    }

    /// Revert a queue to storage-order traversal. Shuffle indexes are left
    /// alone; they are ignored while `shuffled` is off.
    pub fn un_shuffle(&mut self, queue_idx: usize) -> usize {
        let Some(q) = self.queues.get_mut(queue_idx) else {
            return 0;
        };
        if q.shuffled {
            debug!("Un-shuffling queue {}", q.title);
            q.shuffled = false;
        }
        let pos = q.queue_pos;
        self.save_queue_tracks(queue_idx);
        self.bubble_up(queue_idx);
        pos
    }

    /// Move a queue within the master list.
    pub fn move_queue(&mut self, from: usize, to: usize) {
        if from >= self.queues.len() || to >= self.queues.len() {
            return;
        }
        // update the current pointer only if the move affects it
        if let Some(m) = self.master_index {
            if m >= from.min(to) && m <= from.max(to) {
                self.master_index = Some(if from == m {
                    to
                } else if m == to {
                    if m < from {
                        m + 1
                    } else {
                        m - 1
                    }
                } else if to > m {
                    m - 1
                } else {
                    m + 1
                });
            }
        }
        vec_move(&mut self.queues, from, to);
        self.regenerate_indexes();
        self.save_all_queues();
    }

    /// Move a song within the current queue (traversal order indexes).
    pub fn move_current_queue_song(&mut self, from: usize, to: usize) -> Option<usize> {
        self.master_index.map(|i| self.move_song(i, from, to))
    }

    /// Move a song within a queue, traversal order. Returns the new
    /// position tracker.
    pub fn move_song(&mut self, queue_idx: usize, from: usize, to: usize) -> usize {
        let Some(q) = self.queues.get_mut(queue_idx) else {
            return 0;
        };
        if from >= q.len() || to >= q.len() {
            return q.queue_pos_shuffled();
        }
        let cur = q.queue_pos_shuffled();

        // update the current position only if the move affects it
        let mut new_cur = cur;
        if cur >= from.min(to) && cur <= from.max(to) {
            if from == cur {
                new_cur = to;
            } else if cur == to {
                if cur < from {
                    new_cur += 1;
                } else {
                    new_cur -= 1;
                }
            } else if to > cur {
                new_cur -= 1;
            } else {
                new_cur += 1;
            }
        }

        if q.shuffled {
            let mut order: Vec<usize> = (0..q.queue.len()).collect();
            order.sort_by_key(|&i| q.queue[i].shuffle_index);
            vec_move(&mut order, from, to);
            for (traversal, storage) in order.into_iter().enumerate() {
                q.queue[storage].shuffle_index = traversal;
            }
        } else {
            vec_move(&mut q.queue, from, to);
            for (i, t) in q.queue.iter_mut().enumerate() {
                t.shuffle_index = i;
            }
        }
        q.set_current_pos(new_cur);
        let pos = q.queue_pos_shuffled();

        self.save_queue_tracks(queue_idx);
        debug!("Moved item from {} to {}", from, to);
        pos
    }

    /// Load the current queue into the media player.
    pub fn set_current(&mut self, player: &dyn MediaPlayer, auto_seek: bool) -> Option<usize> {
        self.set_current_queue(self.master_index, player, auto_seek)
    }

    /// Load a queue into the media player.
    ///
    /// When the track at the target position is already the actively loaded
    /// player item, the playlist is spliced around it so playback is not
    /// interrupted. Target position 0 is handled as remove-everything-else
    /// then append, because a range replace covering the whole tail would
    /// interrupt playback on the underlying player.
    ///
    /// Returns the traversal position loaded, or None for an empty board.
    pub fn set_current_queue(
        &mut self,
        queue_idx: Option<usize>,
        player: &dyn MediaPlayer,
        auto_seek: bool,
    ) -> Option<usize> {
        let queue_idx = match queue_idx {
            Some(i) if i < self.queues.len() => i,
            _ => {
                player.set_items(Vec::new());
                return None;
            }
        };
        let (pos, items, title, shuffled) = {
            let q = &self.queues[queue_idx];
            (
                q.queue_pos_shuffled(),
                q.shuffled_view(),
                q.title.clone(),
                q.shuffled,
            )
        };
        debug!(
            "Loading queue {} into player. auto_seek = {}, shuffle state = {}",
            title, auto_seek, shuffled
        );

        let seamless = pos < items.len()
            && player
                .current_item()
                .map(|t| t.id == items[pos].id)
                .unwrap_or(false);
        if seamless {
            debug!("Trying seamless queue switch. Is first song?: {}", pos == 0);
            let player_index = player.current_index();
            if pos == 0 {
                let player_count = player.item_count();
                // a range replace would stop playback here, so remove all
                // other items and append the remainder
                if player_index + 1 < player_count {
                    player.remove_items(player_index + 1, player_count);
                }
                if player_index > 0 {
                    player.remove_items(0, player_index);
                }
                player.add_items(player.item_count(), items[1..].to_vec());
            } else {
                player.replace_items(0, player_index, items[..pos].to_vec());
                player.replace_items(pos + 1, usize::MAX, items[pos + 1..].to_vec());
            }
        } else {
            debug!("Seamless is not supported. Loading songs in directly");
            player.set_items(items);
        }

        if auto_seek && !seamless {
            player.seek_to(pos, None);
        }

        self.master_index = Some(queue_idx);
        self.bubble_up(queue_idx);
        Some(pos)
    }

    /// Track the player's reported item index in the current queue.
    pub fn set_current_pos_index(&mut self, traversal: usize) {
        if let Some(index) = self.master_index {
            if let Some(q) = self.queues.get_mut(index) {
                q.set_current_pos(traversal);
            }
            self.save_queue_meta(index);
        }
    }

    /// Discard pending coalesced saves (shutdown path; the final snapshot
    /// is written separately).
    pub fn shutdown(&self) {
        self.saver.discard_pending();
    }

    fn save_queue_tracks(&self, queue_idx: usize) {
        if let Some(q) = self.queues.get(queue_idx) {
            self.saver.schedule(SaveJob::QueueContents(q.clone()));
        }
    }

    fn save_queue_meta(&self, queue_idx: usize) {
        if let Some(q) = self.queues.get(queue_idx) {
            self.saver.schedule(SaveJob::QueueMeta(q.clone()));
        }
    }

    fn save_all_queues(&self) {
        self.saver.schedule(SaveJob::AllQueues(self.queues.clone()));
    }
}
