//! Per-session EPD-driven segmentation state machine.
//!
//! Converts a stream of EPD status events (and the chunk-count clock
//! they drive) into a sequence of STT work emissions (partial/final).
//! `n_chunks` is the session clock — advanced only by EPD events, never
//! by raw chunk ingress — so quiescence detection stays phase-locked to
//! the upstream EPD stream.

/// Pre-roll: chunks included before the first EPD_SPEECH to avoid
/// clipping the first phoneme.
pub const PRE: u64 = 4;
/// In-speech partial cadence: emit a partial every `STEP` chunks of
/// continued speech.
pub const STEP: u64 = 5;
/// Long-pause threshold: a pause this far past `start` forces a final.
pub const LONG: u64 = 50;

/// EPD status codes, authoritative integer contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpdStatus {
    Waiting,
    Speech,
    Pause,
    End,
    Timeout,
    MaxTimeout,
    None,
}

impl EpdStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(EpdStatus::Waiting),
            1 => Some(EpdStatus::Speech),
            2 => Some(EpdStatus::Pause),
            3 => Some(EpdStatus::End),
            4 => Some(EpdStatus::Timeout),
            6 => Some(EpdStatus::MaxTimeout),
            7 => Some(EpdStatus::None),
            _ => None,
        }
    }
}

/// An utterance emission produced by an FSM transition. `is_final`
/// distinguishes a closing final from a mid-utterance partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    pub start: u64,
    pub end: u64,
    pub is_final: bool,
}

/// Per-session segmentation state.
#[derive(Debug, Clone)]
pub struct SegmentationFsm {
    start: u64,
    end: u64,
    flag: bool,
    recognized: bool,
    last_chunk: u64,
    n_chunks: u64,
}

impl Default for SegmentationFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentationFsm {
    pub fn new() -> Self {
        Self { start: 0, end: 0, flag: false, recognized: false, last_chunk: 0, n_chunks: 0 }
    }

    pub fn n_chunks(&self) -> u64 {
        self.n_chunks
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn is_open(&self) -> bool {
        self.flag
    }

    fn reset(&mut self) {
        self.start = self.end;
        self.flag = false;
        self.recognized = false;
        self.last_chunk = self.n_chunks;
    }

    /// Feed one EPD status event. Increments `n_chunks` first, then
    /// runs the transition table, returning zero or more emissions (in
    /// emission order, which is also enqueue order for this session).
    pub fn on_event(&mut self, status: EpdStatus) -> Vec<Emission> {
        self.n_chunks += 1;
        let mut out = Vec::new();

        match status {
            EpdStatus::Speech => {
                if !self.flag {
                    self.flag = true;
                    self.start = self.n_chunks.saturating_sub(PRE);
                    self.last_chunk = self.n_chunks;
                } else if self.n_chunks - self.last_chunk >= STEP {
                    self.end = self.n_chunks;
                    if self.end - self.start > 1 {
                        out.push(Emission { start: self.start, end: self.end, is_final: false });
                    }
                    self.last_chunk = self.n_chunks;
                }
                self.recognized = false;
            }
            EpdStatus::Pause => {
                if !self.recognized {
                    if self.n_chunks - self.start > LONG {
                        self.end = self.n_chunks;
                        if self.end - self.start > 1 {
                            out.push(Emission { start: self.start, end: self.end, is_final: true });
                        }
                        self.reset();
                    } else {
                        self.end = self.n_chunks;
                        self.last_chunk = self.n_chunks;
                        if self.end - self.start > 1 {
                            out.push(Emission { start: self.start, end: self.end, is_final: false });
                        }
                        self.recognized = true;
                    }
                }
            }
            EpdStatus::End => {
                if self.flag {
                    self.end = self.n_chunks;
                    if self.end - self.start > 1 {
                        out.push(Emission { start: self.start, end: self.end, is_final: true });
                    }
                    self.reset();
                }
            }
            EpdStatus::Waiting | EpdStatus::Timeout | EpdStatus::MaxTimeout | EpdStatus::None => {
                // no-op
            }
        }

        out
    }

    /// TURN_END drain step 2: "leftover final" — if there's an open,
    /// non-trivial utterance, close it as a final. Does not advance
    /// `n_chunks` (no new EPD event is implied).
    pub fn leftover_final(&mut self) -> Option<Emission> {
        if self.n_chunks - self.start > 1 {
            self.end = self.n_chunks;
            let emission = Emission { start: self.start, end: self.end, is_final: true };
            self.reset();
            Some(emission)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(fsm: &mut SegmentationFsm, statuses: &[EpdStatus]) -> Vec<Emission> {
        let mut all = Vec::new();
        for s in statuses {
            all.extend(fsm.on_event(*s));
        }
        all
    }

    #[test]
    fn invariant_start_le_end_le_n_chunks_after_every_event() {
        let mut fsm = SegmentationFsm::new();
        let seq = [
            EpdStatus::Waiting,
            EpdStatus::Speech,
            EpdStatus::Speech,
            EpdStatus::Speech,
            EpdStatus::Speech,
            EpdStatus::Pause,
            EpdStatus::Speech,
            EpdStatus::End,
        ];
        for s in seq {
            fsm.on_event(s);
            assert!(fsm.start() <= fsm.end());
            assert!(fsm.end() <= fsm.n_chunks());
        }
    }

    /// Scenario 1 — pre-roll. Chunks 1..10: W,W,W,S,S,S,S,S,S,S.
    #[test]
    fn scenario_pre_roll() {
        let mut fsm = SegmentationFsm::new();
        let statuses = [
            EpdStatus::Waiting,
            EpdStatus::Waiting,
            EpdStatus::Waiting,
            EpdStatus::Speech, // chunk 4: opens, start = max(0, 4-4) = 0
            EpdStatus::Speech, // 5
            EpdStatus::Speech, // 6
            EpdStatus::Speech, // 7
            EpdStatus::Speech, // 8
            EpdStatus::Speech, // 9: 9-4=5 >= STEP -> partial [0,9)
            EpdStatus::Speech, // 10
        ];
        let emissions = feed(&mut fsm, &statuses);
        assert_eq!(emissions, vec![Emission { start: 0, end: 9, is_final: false }]);

        // TURN_END drain's "leftover final" step at chunk 10 (start is
        // unchanged by a partial emission, per spec).
        let leftover = fsm.leftover_final();
        assert_eq!(leftover, Some(Emission { start: 0, end: 10, is_final: true }));
    }

    /// Scenario 2 — short-pause partial. Speech first arrives at
    /// chunk 6 (5 leading EPD_WAITING chunks), so the pre-roll opens
    /// at `start = max(0, 6-PRE) = 2`.
    #[test]
    fn scenario_short_pause_partial() {
        let mut fsm = SegmentationFsm::new();
        let statuses = [
            EpdStatus::Waiting,
            EpdStatus::Waiting,
            EpdStatus::Waiting,
            EpdStatus::Waiting,
            EpdStatus::Waiting,
            EpdStatus::Speech,
        ];
        let emissions = feed(&mut fsm, &statuses);
        assert!(emissions.is_empty(), "no step partial yet");
        assert_eq!(fsm.start(), 2);
        assert_eq!(fsm.n_chunks(), 6);

        let out = fsm.on_event(EpdStatus::Pause);
        assert_eq!(out, vec![Emission { start: 2, end: 7, is_final: false }]);

        // Subsequent pauses do nothing until next Speech (recognized == true).
        let out2 = fsm.on_event(EpdStatus::Pause);
        assert!(out2.is_empty());
    }

    /// Scenario 3 — long-pause final.
    #[test]
    fn scenario_long_pause_final() {
        let mut fsm = SegmentationFsm::new();
        let statuses = vec![EpdStatus::Speech; 55];
        feed(&mut fsm, &statuses);

        let out = fsm.on_event(EpdStatus::Pause);
        assert_eq!(out, vec![Emission { start: 0, end: 56, is_final: true }]);
        assert_eq!(fsm.start(), 56);
        assert_eq!(fsm.end(), 56);
        assert!(!fsm.is_open());
    }

    /// Scenario 4 — two utterances in one turn: S×10, E, S×10, E.
    #[test]
    fn scenario_two_utterances_one_turn() {
        let mut fsm = SegmentationFsm::new();
        let mut emissions = Vec::new();
        for _ in 0..10 {
            emissions.extend(fsm.on_event(EpdStatus::Speech));
        }
        emissions.extend(fsm.on_event(EpdStatus::End));
        for _ in 0..10 {
            emissions.extend(fsm.on_event(EpdStatus::Speech));
        }
        emissions.extend(fsm.on_event(EpdStatus::End));

        let finals: Vec<_> = emissions.iter().filter(|e| e.is_final).collect();
        assert_eq!(finals.len(), 2);
    }

    #[test]
    fn no_speech_emits_nothing() {
        let mut fsm = SegmentationFsm::new();
        let emissions = feed(&mut fsm, &[EpdStatus::Waiting, EpdStatus::Waiting]);
        assert!(emissions.is_empty());
        assert!(fsm.leftover_final().is_none());
    }

    #[test]
    fn end_without_prior_speech_is_a_no_op() {
        // TURN_END arriving while flag == false emits nothing — the
        // guard in the End arm only fires "if flag".
        let mut fsm = SegmentationFsm::new();
        let out = fsm.on_event(EpdStatus::End);
        assert!(out.is_empty());
        assert!(!fsm.is_open());
    }
}
