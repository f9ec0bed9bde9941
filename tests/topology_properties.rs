use kba_sweep::prelude::*;
use proptest::prelude::*;

proptest! {
    #[test]
    fn rank_tiles_cover_the_grid_exactly_once(
        px in 1usize..=4,
        py in 1usize..=3,
        pz in 1usize..=3,
        cx in 1usize..=4,
        cy in 1usize..=4,
        cz in 1usize..=4,
    ) {
        let p = Problem::cube([px * cx, py * cy, pz * cz], [px, py, pz], 1, 1);
        let mut owner = vec![usize::MAX; p.nx * p.ny * p.nz];
        let mut total = 0;
        for rank in 0..p.num_ranks() {
            let info = RankInfo::for_rank(&p, rank);
            prop_assert_eq!(info.extents(), [cx, cy, cz]);
            total += info.num_cells();
            for k in info.klb..info.kub {
                for j in info.jlb..info.jub {
                    for i in info.ilb..info.iub {
                        let at = i + p.nx * (j + p.ny * k);
                        prop_assert_eq!(owner[at], usize::MAX, "cell ({}, {}, {}) owned twice", i, j, k);
                        owner[at] = rank;
                    }
                }
            }
        }
        prop_assert_eq!(total, p.nx * p.ny * p.nz);
        prop_assert!(owner.iter().all(|o| *o != usize::MAX));
    }

    #[test]
    fn planes_partition_the_tile(nx in 1usize..=6, ny in 1usize..=6, nz in 1usize..=6) {
        let planes = Planes::new(nx, ny, nz);
        prop_assert_eq!(planes.len(), nx + ny + nz - 2);
        prop_assert_eq!(planes.total_cells(), nx * ny * nz);
        let mut seen = vec![false; nx * ny * nz];
        for plane in planes.iter() {
            for cell in plane.cells.iter() {
                let [i, j, k] = cell.as_usize();
                prop_assert_eq!(i + j + k, plane.index);
                let at = i + nx * (j + ny * k);
                prop_assert!(!seen[at]);
                seen[at] = true;
            }
        }
        prop_assert!(seen.into_iter().all(|s| s));
    }

    #[test]
    fn neighbors_are_mutual(px in 1usize..=3, py in 1usize..=3, pz in 1usize..=3) {
        let p = Problem::cube([px * 2, py * 2, pz * 2], [px, py, pz], 1, 1);
        for rank in 0..p.num_ranks() {
            let info = RankInfo::for_rank(&p, rank);
            for axis in Axis::ALL {
                if let Neighbor::Rank(up) = info.up(axis) {
                    prop_assert_eq!(RankInfo::for_rank(&p, up).down(axis), Neighbor::Rank(rank));
                }
                if let Neighbor::Rank(down) = info.down(axis) {
                    prop_assert_eq!(RankInfo::for_rank(&p, down).up(axis), Neighbor::Rank(rank));
                }
            }
        }
    }
}
