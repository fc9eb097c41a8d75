mod common;

use bitcoin::hashes::Hash;
use chainfacade::blockchain::{BlockHash, BlockRecord};
use chainfacade::facade::{BlockVerbosity, GetBlock, QueryFacade};
use chainfacade::persistence::{ChainStateAccessor, SqliteRepository};
use common::{build_chain, MockIndexer, MockPeers};
use std::sync::Arc;
use tempfile::tempdir;

fn fill(repository: &SqliteRepository, chain: &common::SyntheticChain, bodies: usize) {
    for (height, header) in chain.headers.iter().enumerate() {
        repository.save_header(height as u32, header).unwrap();
    }
    for block in &chain.blocks[..bodies] {
        repository
            .save_block(&BlockRecord::from_bytes(block.clone()).unwrap())
            .unwrap();
    }
}

#[test]
fn test_sqlite_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("headers.sqlite");
    let path = path.to_str().unwrap();
    let chain = build_chain(15);

    {
        let repository = SqliteRepository::open(path).unwrap();
        fill(&repository, &chain, 5);
    }

    let repository = SqliteRepository::open(path).unwrap();
    let best = repository.get_best_header().unwrap().unwrap();
    assert_eq!(best.block_height, 15);
    assert_eq!(best.block_hash, chain.hashes[15]);

    let header = repository.get_header(&chain.hashes[8]).unwrap().unwrap();
    assert_eq!(header.header_bytes, chain.headers[8]);
    assert_eq!(header.next_block_hash, Some(chain.hashes[9]));

    let block = repository.get_block(&chain.hashes[4]).unwrap().unwrap();
    assert_eq!(block.txids, chain.txids[4]);
    assert!(repository.get_block(&chain.hashes[5]).unwrap().is_none());
    assert!(repository.get_header(&BlockHash::from_byte_array([9u8; 32])).unwrap().is_none());
}

#[test]
fn test_corrupt_stored_body_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("headers.sqlite");
    let repository = SqliteRepository::open(path.to_str().unwrap()).unwrap();
    let chain = build_chain(1);
    fill(&repository, &chain, 0);

    let mut record = BlockRecord::from_bytes(chain.blocks[1].clone()).unwrap();
    record.block_bytes.truncate(100);
    repository.save_block(&record).unwrap();

    assert!(repository.get_block(&chain.hashes[1]).is_err());
}

#[tokio::test]
async fn test_facade_over_sqlite() {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let dir = tempdir().unwrap();
        let path = dir.path().join("headers.sqlite");
        let repository = SqliteRepository::open(path.to_str().unwrap()).unwrap();
        let chain = build_chain(20);
        fill(&repository, &chain, 10);

        let peers = Arc::new(MockPeers::serving(&chain, 10..=20));
        let facade = QueryFacade::new(Arc::new(repository), peers.clone(), Arc::new(MockIndexer::new()));

        let stored = facade
            .get_block(&chain.hashes[9], BlockVerbosity::Raw)
            .await
            .unwrap();
        assert_eq!(stored, Some(GetBlock::Raw(hex::encode(&chain.blocks[9]))));
        assert_eq!(peers.calls(), 0);

        let fetched = facade
            .get_block(&chain.hashes[15], BlockVerbosity::Raw)
            .await
            .unwrap();
        assert_eq!(fetched, Some(GetBlock::Raw(hex::encode(&chain.blocks[15]))));
        assert_eq!(peers.calls(), 1);

        assert_eq!(facade.get_block_count().await.unwrap(), Some(20));
    })
    .await
    .expect("test_facade_over_sqlite timed out");
}
