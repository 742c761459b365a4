use beaconfield::algorithms::spatial_hash::SpatialHash;
use beaconfield::config::SpatialHashConfig;
use beaconfield::{Beacon, BeaconId, Bounds, Field, FieldConfig, ManualClock, Vec2};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
enum Op {
    Add { id: u8, x: i16, y: i16 },
    Move { id: u8, x: i16, y: i16 },
    Remove { id: u8 },
    Tick { ms: u16 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<u8>(), any::<i16>(), any::<i16>()).prop_map(|(id, x, y)| Op::Add { id, x, y }),
        3 => (any::<u8>(), any::<i16>(), any::<i16>()).prop_map(|(id, x, y)| Op::Move { id, x, y }),
        2 => any::<u8>().prop_map(|id| Op::Remove { id }),
        1 => any::<u16>().prop_map(|ms| Op::Tick { ms }),
    ]
}

fn pos(x: i16, y: i16) -> Vec2 {
    Vec2::new(x as f32 * 0.5, y as f32 * 0.5)
}

fn everything() -> Bounds {
    Bounds::new(-20_000.0, -20_000.0, 20_000.0, 20_000.0)
}

fn assert_bijection(f: &mut Field, model: &BTreeMap<BeaconId, Vec2>) {
    assert_eq!(f.beacon_count(), model.len());
    assert_eq!(f.index_metrics().beacon_count, model.len());
    for (id, p) in model {
        let hit = f.query_bounds(&Bounds::around(*p, 0.0));
        assert!(hit.entities.contains(id), "beacon {} not found at its own position", id);
        assert_eq!(f.beacon(*id).map(|b| b.pos()), Some(*p));
    }
    let all = f.query_bounds(&everything());
    let expected: Vec<BeaconId> = model.keys().copied().collect();
    assert_eq!(all.entities, expected);
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 512, .. ProptestConfig::default() })]

    #[test]
    fn index_tracks_every_edit(seq in prop::collection::vec(op_strategy(), 1..80)) {
        let clock = ManualClock::new(0.0);
        let mut cfg = FieldConfig::default();
        cfg.hash.rebalance_interval_ms = 500.0;
        let mut f = Field::with_clock(cfg, clock.clone()).unwrap();
        let mut model: BTreeMap<BeaconId, Vec2> = BTreeMap::new();
        for op in seq {
            match op {
                Op::Add { id, x, y } => {
                    let id = id as BeaconId % 64;
                    assert!(f.add_beacon(Beacon::new(id, pos(x, y).x, pos(x, y).y)));
                    model.insert(id, pos(x, y));
                }
                Op::Move { id, x, y } => {
                    let id = id as BeaconId % 64;
                    let known = model.contains_key(&id);
                    assert_eq!(f.move_beacon(id, pos(x, y).x, pos(x, y).y), known);
                    if known {
                        model.insert(id, pos(x, y));
                    }
                }
                Op::Remove { id } => {
                    let id = id as BeaconId % 64;
                    assert_eq!(f.remove_beacon(id), model.remove(&id).is_some());
                }
                Op::Tick { ms } => clock.advance(ms as f64),
            }
        }
        assert_bijection(&mut f, &model);
    }

    #[test]
    fn query_bounds_never_misses(
        points in prop::collection::vec((any::<i16>(), any::<i16>()), 0..200),
        rect in (any::<i16>(), any::<i16>(), any::<i16>(), any::<i16>()),
        cell in 1u16..400,
    ) {
        let cfg = SpatialHashConfig { cell_size: cell as f32, enable_rebalancing: false, ..Default::default() };
        let mut hash = SpatialHash::new(cfg, ManualClock::new(0.0));
        for (i, (x, y)) in points.iter().enumerate() {
            let p = pos(*x, *y);
            hash.add_beacon(&Beacon::new(i as BeaconId, p.x, p.y));
        }
        let (a, b) = (pos(rect.0, rect.1), pos(rect.2, rect.3));
        let r = Bounds::new(a.x, a.y, b.x, b.y);
        let got = hash.query_bounds(&r);
        for (i, (x, y)) in points.iter().enumerate() {
            if r.contains(pos(*x, *y)) {
                prop_assert!(got.entities.contains(&(i as BeaconId)), "missed {} at {:?}", i, pos(*x, *y));
            }
        }
        prop_assert_eq!(got.hit_count + got.miss_count, got.cells_searched);
    }

    #[test]
    fn rebuild_ignores_input_order(
        points in prop::collection::vec((any::<i16>(), any::<i16>()), 1..200),
        salt in any::<u64>(),
    ) {
        let beacons: Vec<Beacon> = points
            .iter()
            .enumerate()
            .map(|(i, (x, y))| Beacon::new(i as BeaconId, pos(*x, *y).x, pos(*x, *y).y))
            .collect();
        let mut shuffled = beacons.clone();
        shuffled.sort_by_key(|b| (b.id as u64).wrapping_mul(salt | 1).rotate_left(17));

        let mut a = SpatialHash::new(SpatialHashConfig::default(), ManualClock::new(0.0));
        let mut b = SpatialHash::new(SpatialHashConfig::default(), ManualClock::new(0.0));
        a.rebuild(&beacons);
        b.rebuild(&shuffled);
        let expected: Vec<BeaconId> = (0..beacons.len() as BeaconId).collect();
        prop_assert_eq!(&a.query_bounds(&everything()).entities, &expected);
        prop_assert_eq!(&b.query_bounds(&everything()).entities, &expected);
        prop_assert_eq!(a.cell_count(), b.cell_count());
        for bc in &beacons {
            prop_assert_eq!(a.cell_of(bc.id), b.cell_of(bc.id));
        }
    }
}

#[test]
fn duplicate_positions_scenario() {
    let cfg = SpatialHashConfig { cell_size: 10.0, enable_rebalancing: false, ..Default::default() };
    let mut hash = SpatialHash::new(cfg, ManualClock::new(0.0));
    hash.add_beacon(&Beacon::new(1, 0.0, 0.0));
    hash.add_beacon(&Beacon::new(2, 0.0, 0.0));
    hash.add_beacon(&Beacon::new(3, 5.0, 5.0));
    let r = hash.query_bounds(&Bounds::new(-1.0, -1.0, 6.0, 6.0));
    assert_eq!(r.entities, vec![1, 2, 3]);
    assert_eq!(r.cells_searched, 4);
}
