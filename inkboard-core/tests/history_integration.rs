//! Undo/redo behaviour through the public `Board` API.

use inkboard_core::{Asset, Board, Stroke};

fn snapshot(board: &Board) -> Vec<u8> {
    serde_json::to_vec(board.document()).unwrap()
}

#[test]
fn test_add_undo_redo_scenario() {
    let mut board = Board::default();
    let a = Stroke::new("s1").with("points", vec![1.0, 2.0, 3.0, 4.0]);

    board.add_stroke(a.clone());
    assert_eq!(board.current_strokes(), &[a.clone()]);
    assert_eq!(board.history().undo_depth(), 1);

    assert!(board.undo());
    assert!(board.current_strokes().is_empty());
    assert_eq!(board.history().redo_depth(), 1);

    assert!(board.redo());
    assert_eq!(board.current_strokes(), &[a]);
}

#[test]
fn test_undo_n_then_redo_n_restores_bytes() {
    let mut board = Board::default();
    board.add_stroke(Stroke::new("s1").with("color", "red"));
    board.add_stroke(Stroke::new("s2"));
    board.add_asset(Asset::new("a1").with("x", 10));
    board.update_stroke(Stroke::new("s1").with("color", "blue"));
    board.update_asset(Asset::new("a1").with("x", 40));
    board.delete_stroke("s2");
    board.clear_board();
    board.add_stroke(Stroke::new("s3"));

    let history_depth = board.history().undo_depth();
    let mut states = vec![snapshot(&board)];
    for _ in 0..history_depth {
        assert!(board.undo());
        states.push(snapshot(&board));
    }
    assert!(!board.undo());
    assert_eq!(board.current_strokes().len(), 0);
    assert_eq!(board.current_assets().len(), 0);

    for expected in states.iter().rev().skip(1) {
        assert!(board.redo());
        assert_eq!(&snapshot(&board), expected);
    }
    assert!(!board.redo());
}

#[test]
fn test_each_undo_reverses_exactly_one_entry() {
    let mut board = Board::default();
    board.add_stroke(Stroke::new("s1"));
    let before = snapshot(&board);
    board.delete_stroke("s1");
    let after = snapshot(&board);

    board.undo();
    assert_eq!(snapshot(&board), before);
    board.redo();
    assert_eq!(snapshot(&board), after);
}

#[test]
fn test_new_mutation_after_undo_clears_redo() {
    let mut board = Board::default();
    board.add_stroke(Stroke::new("s1"));
    board.undo();
    assert!(board.can_redo());

    board.add_stroke(Stroke::new("s2"));
    assert!(!board.can_redo());
    assert!(!board.redo());
    assert_eq!(board.current_strokes().len(), 1);
    assert_eq!(board.current_strokes()[0].id, "s2");
}

#[test]
fn test_diff_buffer_empty_after_undo_and_redo() {
    let mut board = Board::default();
    board.add_stroke(Stroke::new("s1"));
    board.add_stroke(Stroke::new("s2"));
    board.undo();

    let pending = board.take_pending();
    assert!(pending.ops.is_empty());
    assert!(pending.force_full);

    assert!(board.redo());
    let pending = board.take_pending();
    assert!(pending.ops.is_empty());
    assert!(pending.force_full);
}
