//! Cross-crate integration tests: storage adapter driven from a real
//! `Transfer`/`Picker` pair, the server login handshake, and the search
//! expression encoder wired through a `ServerConnection`.

use ed2k_core::hash::{hash_bytes, piece_count, PIECE_SIZE};
use ed2k_core::tag::{names, Tag, TagList, TagValue};
use ed2k_files::storage::{FileStorage, StorageAdapter};
use ed2k_net::search::Node;
use ed2k_net::server::ServerConnection;
use ed2k_transfer::picker::PickFlags;
use ed2k_transfer::Transfer;

#[tokio::test]
async fn full_download_roundtrip_through_storage_and_picker() {
    let file_size = PIECE_SIZE + 1000;
    let data: Vec<u8> = (0..file_size).map(|i| (i % 251) as u8).collect();
    let hash_set = hash_bytes(&data).unwrap();
    assert_eq!(piece_count(file_size), 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("content.bin");
    let mut storage = FileStorage::open(&path, file_size, hash_set.clone()).await.unwrap();

    let mut transfer = Transfer::new(hash_set.clone(), file_size);
    transfer.enter_checking_resume_data(None).unwrap();
    assert_eq!(transfer.state(), ed2k_transfer::TransferState::Downloading);

    // Drive the picker for piece 0 and write every block straight through.
    let peer_has = vec![true; transfer.picker_mut().unwrap().num_pieces() as usize];
    loop {
        let picker = transfer.picker_mut().unwrap();
        if picker.is_piece_finished(0) {
            break;
        }
        let picked = picker.pick_blocks(&peer_has, 4, PickFlags::default());
        if picked.is_empty() {
            break;
        }
        for block in picked {
            picker.mark_requested(block).unwrap();
            let range = picker.block_range(block);
            let bytes = &data[range.start as usize..range.end as usize];
            storage.write(block.piece, range.start - block.piece * PIECE_SIZE, bytes).await.unwrap();
            picker.mark_finished(block).unwrap();
        }
    }

    let piece0 = storage.read(0, 0, PIECE_SIZE).await.unwrap();
    let outcome = transfer.verify_piece(0, &piece0).unwrap();
    assert!(outcome.is_ok());
    assert!(transfer.picker_mut().unwrap().have_piece(0));

    let resume = transfer.save_resume_data();
    let blob = resume.encode().unwrap();
    let roundtripped = ed2k_files::resume::ResumeData::decode(&blob).unwrap();
    assert_eq!(roundtripped.transfer_hash, transfer.transfer_hash());

    let verified = storage.check_files().await.unwrap();
    assert!(verified.contains(&0));
}

#[test]
fn server_login_then_offer_files_produces_framed_bytes() {
    let mut conn = ServerConnection::new();
    conn.on_resolved();

    let client_hash = ed2k_core::hash::Hash::of(b"integration-test-client");
    let tags = TagList(vec![Tag::with_id(names::CT_NAME, TagValue::Str("tester".into()))]);
    let login_body = conn.build_login_request(client_hash, 4662, &tags);
    let login_frame = ServerConnection::frame(ed2k_core::opcode::server::LOGIN_REQUEST, &login_body);
    assert_eq!(login_frame[0], ed2k_core::frame::Protocol::Ed2k as u8);

    let mut w = ed2k_core::primitives::Writer::new();
    w.write_u32(0x0200_1234);
    conn.on_id_change(&w.into_vec()).unwrap();

    let share = ed2k_net::server::ShareEntry {
        hash: ed2k_core::hash::Hash::of(b"shared-file"),
        point: (0x0200_1234, 4662),
        tags: TagList(vec![Tag::with_id(names::FT_FILENAME, TagValue::Str("movie.avi".into()))]),
    };
    let body = conn.build_offer_files(&[share]).unwrap();
    assert!(!body.is_empty());
}

#[test]
fn search_expression_encodes_through_server_connection() {
    let mut conn = ServerConnection::new();
    conn.on_resolved();
    let client_hash = ed2k_core::hash::Hash::of(b"search-client");
    let tags = TagList::default();
    let _ = conn.build_login_request(client_hash, 4662, &tags);
    let mut w = ed2k_core::primitives::Writer::new();
    w.write_u32(1);
    conn.on_id_change(&w.into_vec()).unwrap();

    let expr = Node::and(Node::Str("ubuntu".into()), Node::Str("iso".into()));
    let body = conn.build_search_request(&expr).unwrap();
    assert!(!body.is_empty());
}
