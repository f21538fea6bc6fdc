// Copyright 2017-2019 Sean Gillespie.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use std::io::{self, Write};
use std::sync::Mutex;

use csv::Writer;
use thiserror::Error;

use crate::rating::RatingDelta;
use crate::types::{EndReason, GameResult, Side};

/// Everything persisted about a finished, rated game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    pub title: String,
    pub result: GameResult,
    pub reason: EndReason,
    pub transcript: String,
    pub deltas: Vec<RatingDelta>,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("result store lock poisoned")]
    Poisoned,
}

/// Where finished games go. Casual games are never handed to a store.
pub trait ResultStore: Send + Sync {
    fn save(&self, summary: &GameSummary) -> Result<(), RecordError>;
}

pub struct NullStore;

impl ResultStore for NullStore {
    fn save(&self, _summary: &GameSummary) -> Result<(), RecordError> {
        Ok(())
    }
}

/// Keeps summaries in memory.
#[derive(Default)]
pub struct MemoryStore {
    summaries: Mutex<Vec<GameSummary>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn summaries(&self) -> Vec<GameSummary> {
        match self.summaries.lock() {
            Ok(summaries) => summaries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ResultStore for MemoryStore {
    fn save(&self, summary: &GameSummary) -> Result<(), RecordError> {
        let mut summaries = self.summaries.lock().map_err(|_| RecordError::Poisoned)?;
        summaries.push(summary.clone());
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultRow {
    pub game: String,
    pub result: String,
    pub reason: String,
    pub name: String,
    pub side: Side,
    pub before: i32,
    pub after: i32,
}

/// Writes one CSV row per rating change.
pub struct CsvRecorder<W: Write> {
    writer: Mutex<Writer<W>>,
}

impl<W: Write> CsvRecorder<W> {
    pub fn new(writer: W) -> CsvRecorder<W> {
        CsvRecorder {
            writer: Mutex::new(Writer::from_writer(writer)),
        }
    }

    pub fn into_inner(self) -> Result<W, RecordError> {
        let writer = self.writer.into_inner().map_err(|_| RecordError::Poisoned)?;
        writer
            .into_inner()
            .map_err(|err| RecordError::Io(io::Error::new(err.error().kind(), err.to_string())))
    }
}

impl<W: Write + Send> ResultStore for CsvRecorder<W> {
    fn save(&self, summary: &GameSummary) -> Result<(), RecordError> {
        let mut writer = self.writer.lock().map_err(|_| RecordError::Poisoned)?;
        for delta in &summary.deltas {
            writer.serialize(ResultRow {
                game: summary.title.clone(),
                result: summary.result.pgn().to_owned(),
                reason: summary.reason.to_string(),
                name: delta.name.clone(),
                side: delta.side,
                before: delta.before,
                after: delta.after,
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> GameSummary {
        GameSummary {
            title: "friday".to_owned(),
            result: GameResult::Win(Side::Black),
            reason: EndReason::Checkmate,
            transcript: String::new(),
            deltas: vec![
                RatingDelta {
                    name: "alice".to_owned(),
                    side: Side::White,
                    before: 1500,
                    after: 1484,
                },
                RatingDelta {
                    name: "bob".to_owned(),
                    side: Side::Black,
                    before: 1500,
                    after: 1516,
                },
            ],
        }
    }

    #[test]
    fn csv_rows_per_delta() {
        let recorder = CsvRecorder::new(vec![]);
        recorder.save(&summary()).unwrap();
        let bytes = recorder.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!("game,result,reason,name,side,before,after", lines[0]);
        assert_eq!("friday,0-1,checkmate,alice,white,1500,1484", lines[1]);
        assert_eq!("friday,0-1,checkmate,bob,black,1500,1516", lines[2]);
    }

    #[test]
    fn memory_store_keeps_summaries() {
        let store = MemoryStore::new();
        store.save(&summary()).unwrap();
        assert_eq!(1, store.summaries().len());
    }
}
