//! Combining captured deltas is equivalent to applying them one by one.

use csync_codec::{Delta, DeltaCapture};
use proptest::prelude::*;
use rusqlite::Connection;

const SCHEMA: &str =
    "CREATE TABLE player (id TEXT PRIMARY KEY, name TEXT NOT NULL, score INTEGER NOT NULL);";

#[derive(Debug, Clone)]
enum Action {
    Insert { id: u8, score: i64 },
    Update { id: u8, score: i64 },
    Rename { id: u8, name: String },
    Delete { id: u8 },
}

impl Action {
    fn run(&self, conn: &Connection) {
        match self {
            Action::Insert { id, score } => conn
                .execute(
                    "INSERT OR IGNORE INTO player VALUES (?1, 'new', ?2)",
                    rusqlite::params![format!("p{id}"), score],
                )
                .unwrap(),
            Action::Update { id, score } => conn
                .execute(
                    "UPDATE player SET score = ?2 WHERE id = ?1",
                    rusqlite::params![format!("p{id}"), score],
                )
                .unwrap(),
            Action::Rename { id, name } => conn
                .execute(
                    "UPDATE player SET name = ?2 WHERE id = ?1",
                    rusqlite::params![format!("p{id}"), name],
                )
                .unwrap(),
            Action::Delete { id } => conn
                .execute(
                    "DELETE FROM player WHERE id = ?1",
                    rusqlite::params![format!("p{id}")],
                )
                .unwrap(),
        };
    }
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..6, -100i64..100).prop_map(|(id, score)| Action::Insert { id, score }),
        (0u8..6, -100i64..100).prop_map(|(id, score)| Action::Update { id, score }),
        (0u8..6, "[a-z]{1,8}").prop_map(|(id, name)| Action::Rename { id, name }),
        (0u8..6).prop_map(|id| Action::Delete { id }),
    ]
}

fn fresh() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn
}

fn rows(conn: &Connection) -> Vec<(String, String, i64)> {
    let mut stmt = conn
        .prepare("SELECT id, name, score FROM player ORDER BY id")
        .unwrap();
    stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn combine_then_apply_matches_sequential_apply(
        commits in prop::collection::vec(prop::collection::vec(action(), 1..4), 1..8)
    ) {
        let source = fresh();
        let mut deltas = Vec::new();
        for commit in &commits {
            let capture = DeltaCapture::start(&source).unwrap();
            for action in commit {
                action.run(&source);
            }
            deltas.push(capture.finish().unwrap());
        }

        let sequential = fresh();
        for delta in &deltas {
            let report = delta.apply(&sequential).unwrap();
            prop_assert_eq!(report.conflicts, 0);
        }

        let combined = Delta::combine(&deltas).unwrap();
        let collapsed = fresh();
        let report = combined.apply(&collapsed).unwrap();
        prop_assert_eq!(report.conflicts, 0);

        prop_assert_eq!(rows(&sequential), rows(&source));
        prop_assert_eq!(rows(&collapsed), rows(&source));
    }

    #[test]
    fn combined_delta_decodes(
        commits in prop::collection::vec(prop::collection::vec(action(), 1..4), 1..6)
    ) {
        let source = fresh();
        let mut deltas = Vec::new();
        for commit in &commits {
            let capture = DeltaCapture::start(&source).unwrap();
            for action in commit {
                action.run(&source);
            }
            deltas.push(capture.finish().unwrap());
        }
        let combined = Delta::combine(&deltas).unwrap();
        prop_assert!(combined.validate().is_ok());
        let ops = combined.decode().unwrap();
        prop_assert!(ops.len() <= 6);
    }
}
