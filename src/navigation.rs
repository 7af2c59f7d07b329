//! Navigation position (surah, ayah) and the audio source key derived
//! from it. Every applied movement bumps an epoch that async completions
//! are checked against, so late callbacks from a previous position can be
//! discarded before they touch state.

use serde::Serialize;

pub const SURAH_MIN: u16 = 1;
pub const SURAH_MAX: u16 = 114;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NavigationPosition {
    pub surah: u16,
    pub ayah: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavCommand {
    NextSurah,
    PrevSurah,
    NextAyah,
    PrevAyah,
    JumpTo { surah: u16, ayah: u16 },
}

/// Zero-padded 3+3 digit source key, e.g. surah 2 ayah 7 -> "002007".
/// Resolved against the configured audio base path by the caller.
pub fn audio_source_key(surah: u16, ayah: u16) -> String {
    format!("{surah:03}{ayah:03}")
}

pub struct NavigationState {
    position: NavigationPosition,
    epoch: u64,
    /// Ayah count of the current surah once its verse list is known.
    /// Forward movement within a surah is clamped against it.
    ayat_count: Option<u16>,
}

impl NavigationState {
    pub fn new() -> Self {
        Self {
            position: NavigationPosition { surah: 1, ayah: 1 },
            epoch: 0,
            ayat_count: None,
        }
    }

    pub fn position(&self) -> NavigationPosition {
        self.position
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Record the ayah count of the current surah. A position taken on
    /// trust while the count was unknown (same-surah jumps accept any
    /// ayah) is pulled back inside `[1, count]` now that it is known;
    /// returns `true` when that happened, with the epoch bumped so
    /// completions issued for the out-of-range position are discarded.
    pub fn set_ayat_count(&mut self, count: u16) -> bool {
        self.ayat_count = Some(count);
        let limit = count.max(1);
        if self.position.ayah > limit {
            self.position.ayah = limit;
            self.epoch += 1;
            return true;
        }
        false
    }

    pub fn audio_source_key(&self) -> String {
        audio_source_key(self.position.surah, self.position.ayah)
    }

    /// Apply a movement. Returns the new position when it actually moved
    /// (and the epoch was bumped); `None` for a movement absorbed at a
    /// boundary. Any surah change resets the ayah to 1 and forgets the
    /// previous surah's ayah count.
    pub fn apply(&mut self, command: NavCommand) -> Option<NavigationPosition> {
        let current = self.position;
        let next = match command {
            NavCommand::NextSurah if current.surah < SURAH_MAX => NavigationPosition {
                surah: current.surah + 1,
                ayah: 1,
            },
            NavCommand::PrevSurah if current.surah > SURAH_MIN => NavigationPosition {
                surah: current.surah - 1,
                ayah: 1,
            },
            NavCommand::NextAyah => match self.ayat_count {
                Some(count) if current.ayah < count => NavigationPosition {
                    surah: current.surah,
                    ayah: current.ayah + 1,
                },
                _ => current,
            },
            NavCommand::PrevAyah if current.ayah > 1 => NavigationPosition {
                surah: current.surah,
                ayah: current.ayah - 1,
            },
            NavCommand::JumpTo { surah, ayah } => {
                let surah = surah.clamp(SURAH_MIN, SURAH_MAX);
                if surah != current.surah {
                    NavigationPosition { surah, ayah: 1 }
                } else {
                    let ayah = match self.ayat_count {
                        Some(count) => ayah.clamp(1, count.max(1)),
                        None => ayah.max(1),
                    };
                    NavigationPosition { surah, ayah }
                }
            }
            _ => current,
        };

        if next == current {
            return None;
        }
        if next.surah != current.surah {
            self.ayat_count = None;
        }
        self.position = next;
        self.epoch += 1;
        Some(next)
    }
}

impl Default for NavigationState {
    fn default() -> Self {
        Self::new()
    }
}
