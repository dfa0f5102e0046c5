use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::*;

use imdedup::bktree::{HashIndex, IndexEntry};
use imdedup::hamming::range_hamming;
use imdedup::phash::PHash;

/// 生成若干个中心，每个中心周围随机翻转少量比特
fn clustered_hashes(rng: &mut StdRng, centers: usize, per_center: usize) -> Vec<PHash> {
    let mut hashes = vec![];
    for _ in 0..centers {
        let center = rng.random::<u64>();
        hashes.push(PHash::from(center));
        for _ in 0..per_center {
            let mut h = center;
            for _ in 0..rng.random_range(1..8) {
                h ^= 1u64 << rng.random_range(0..64u32);
            }
            hashes.push(PHash::from(h));
        }
    }
    hashes
}

fn build(hashes: &[PHash]) -> (HashIndex, Vec<PHash>) {
    let mut index = HashIndex::new();
    let mut keys = vec![];
    for &hash in hashes {
        if index.insert(hash, IndexEntry { hash, asset_id: Some(hash.to_hex()) }) {
            keys.push(hash);
        }
    }
    (index, keys)
}

#[rstest]
#[case(0)]
#[case(3)]
#[case(10)]
#[case(64)]
fn query_matches_linear_scan(#[case] max_distance: u32) {
    let mut rng = StdRng::seed_from_u64(0x5eed + max_distance as u64);
    let hashes = clustered_hashes(&mut rng, 50, 20);
    let (index, keys) = build(&hashes);
    assert_eq!(index.len(), keys.len());

    let flat = keys.iter().flat_map(|k| k.0).collect::<Vec<_>>();
    let mut queries = hashes.iter().step_by(7).copied().collect::<Vec<_>>();
    queries.push(PHash::from(rng.random::<u64>()));
    for query in &queries {
        let expected = range_hamming::<64>(&query.0, &flat, max_distance)
            .into_iter()
            .map(|(i, d)| (d, keys[i]))
            .collect::<BTreeSet<_>>();
        let actual = index
            .query(query, max_distance)
            .into_iter()
            .flat_map(|(d, entries)| entries.into_iter().map(move |e| (d, e.hash)))
            .collect::<BTreeSet<_>>();
        assert_eq!(actual, expected, "query {query}");
    }
}

#[test]
fn serialized_tree_answers_same_queries() {
    let mut rng = StdRng::seed_from_u64(42);
    let hashes = clustered_hashes(&mut rng, 20, 10);
    let (index, _) = build(&hashes);

    let restored = HashIndex::deserialize(&index.serialize().unwrap()).unwrap();
    assert_eq!(restored.len(), index.len());
    for query in &hashes {
        assert_eq!(restored.query(query, 6), index.query(query, 6));
    }
}
