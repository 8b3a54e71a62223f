//! MPM88: 2D material point method with 8192 particles on a 128x128 grid
//!
//! Kernels are host-linked so the module needs no compiled payloads. Graph
//! `init` seeds the particles, graph `update` runs [`SUBSTEPS`] substeps of
//! grid reset / P2G / grid update / G2P and then writes `pos`.

use aotforge::backend::cpu::{parallel_for, HostSymbolTable, LaunchContext};
use aotforge::program::RuntimeExecutor;
use aotforge::value::{ArgMap, IValue, Ndarray, PrimitiveType};

use super::fixtures::{dispatch_same, ndarray, pinned_ndarray, ArtifactBuilder};

pub const NR_PARTICLES: usize = 8192;
pub const N_GRID: usize = 128;
pub const SUBSTEPS: usize = 8;

const DX: f32 = 1.0 / N_GRID as f32;
const INV_DX: f32 = N_GRID as f32;
const DT: f32 = 2e-4;
const P_VOL: f32 = (DX * 0.5) * (DX * 0.5);
const P_RHO: f32 = 1.0;
const P_MASS: f32 = P_VOL * P_RHO;
const GRAVITY: f32 = 9.8;
const BOUND: usize = 3;
const E: f32 = 400.0;

/// splitmix64 of the index, mapped to [0, 1)
fn unit_random(i: u64) -> f32 {
    let mut z = i.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 40) as f32 / (1u64 << 24) as f32
}

/// Per-particle quadratic B-spline stencil
struct Stencil {
    base: [usize; 2],
    fx: [f32; 2],
    w: [[f32; 2]; 3],
}

impl Stencil {
    fn new(px: f32, py: f32) -> Self {
        let xp = [px * INV_DX, py * INV_DX];
        let max_base = (N_GRID - 3) as f32;
        let base_f = [
            (xp[0] - 0.5).floor().clamp(0.0, max_base),
            (xp[1] - 0.5).floor().clamp(0.0, max_base),
        ];
        let fx = [xp[0] - base_f[0], xp[1] - base_f[1]];
        let mut w = [[0.0f32; 2]; 3];
        for d in 0..2 {
            w[0][d] = 0.5 * (1.5 - fx[d]).powi(2);
            w[1][d] = 0.75 - (fx[d] - 1.0).powi(2);
            w[2][d] = 0.5 * (fx[d] - 0.5).powi(2);
        }
        Stencil {
            base: [base_f[0] as usize, base_f[1] as usize],
            fx,
            w,
        }
    }

    /// (cell index, weight, dpos) for each of the 3x3 neighbours
    fn neighbours(&self) -> impl Iterator<Item = (usize, f32, [f32; 2])> + '_ {
        (0..3).flat_map(move |i| {
            (0..3).map(move |j| {
                let cell = (self.base[0] + i) * N_GRID + (self.base[1] + j);
                let weight = self.w[i][0] * self.w[j][1];
                let dpos = [(i as f32 - self.fx[0]) * DX, (j as f32 - self.fx[1]) * DX];
                (cell, weight, dpos)
            })
        })
    }
}

/// Raw pointer that may cross into rayon workers; each worker writes a
/// disjoint index range.
#[derive(Clone, Copy)]
struct SharedMut(*mut f32);

unsafe impl Send for SharedMut {}
unsafe impl Sync for SharedMut {}

impl SharedMut {
    unsafe fn write(&self, index: usize, value: f32) {
        *self.0.add(index) = value;
    }
}

/// init_particles(x: [N]x[2], v: [N]x[2], J: [N])
unsafe extern "C-unwind" fn init_particles(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    let x = SharedMut(ctx.array_slice_mut::<f32>(0).as_mut_ptr());
    let v = SharedMut(ctx.array_slice_mut::<f32>(1).as_mut_ptr());
    let j = SharedMut(ctx.array_slice_mut::<f32>(2).as_mut_ptr());
    let n = ctx.shape(2).num_elements();
    parallel_for(n, move |p| {
        let seed = p as u64 * 2;
        x.write(2 * p, unit_random(seed) * 0.4 + 0.2);
        x.write(2 * p + 1, unit_random(seed + 1) * 0.4 + 0.2);
        v.write(2 * p, 0.0);
        v.write(2 * p + 1, -1.0);
        j.write(p, 1.0);
    });
}

/// substep_reset_grid(grid_v: [G,G]x[2], grid_m: [G,G])
unsafe extern "C-unwind" fn substep_reset_grid(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    ctx.array_slice_mut::<f32>(0).fill(0.0);
    ctx.array_slice_mut::<f32>(1).fill(0.0);
}

/// substep_p2g(x, v, C: [N]x[2,2], J, grid_v, grid_m)
///
/// Scatter is serial so the result does not depend on thread scheduling.
unsafe extern "C-unwind" fn substep_p2g(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    let x = ctx.array_slice::<f32>(0);
    let v = ctx.array_slice::<f32>(1);
    let c = ctx.array_slice::<f32>(2);
    let j = ctx.array_slice::<f32>(3);
    let grid_v = ctx.array_slice_mut::<f32>(4);
    let grid_m = ctx.array_slice_mut::<f32>(5);

    for p in 0..j.len() {
        let stencil = Stencil::new(x[2 * p], x[2 * p + 1]);
        let stress = -DT * 4.0 * E * P_VOL * (j[p] - 1.0) * INV_DX * INV_DX;
        let cp = &c[4 * p..4 * p + 4];
        let affine = [
            stress + P_MASS * cp[0],
            P_MASS * cp[1],
            P_MASS * cp[2],
            stress + P_MASS * cp[3],
        ];
        for (cell, weight, dpos) in stencil.neighbours() {
            let ax = affine[0] * dpos[0] + affine[1] * dpos[1];
            let ay = affine[2] * dpos[0] + affine[3] * dpos[1];
            grid_v[2 * cell] += weight * (P_MASS * v[2 * p] + ax);
            grid_v[2 * cell + 1] += weight * (P_MASS * v[2 * p + 1] + ay);
            grid_m[cell] += weight * P_MASS;
        }
    }
}

/// substep_update_grid_v(grid_v, grid_m)
unsafe extern "C-unwind" fn substep_update_grid_v(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    let grid_v = SharedMut(ctx.array_slice_mut::<f32>(0).as_mut_ptr());
    let grid_m = ctx.array_slice::<f32>(1);
    let gv = grid_v.0 as *const f32;
    let gv = SharedConst(gv);
    parallel_for(N_GRID * N_GRID, move |cell| {
        let m = grid_m[cell];
        if m <= 0.0 {
            return;
        }
        let (i, jj) = (cell / N_GRID, cell % N_GRID);
        let mut vx = gv.read(2 * cell) / m;
        let mut vy = gv.read(2 * cell + 1) / m - DT * GRAVITY;
        if (i < BOUND && vx < 0.0) || (i > N_GRID - BOUND && vx > 0.0) {
            vx = 0.0;
        }
        if (jj < BOUND && vy < 0.0) || (jj > N_GRID - BOUND && vy > 0.0) {
            vy = 0.0;
        }
        grid_v.write(2 * cell, vx);
        grid_v.write(2 * cell + 1, vy);
    });
}

#[derive(Clone, Copy)]
struct SharedConst(*const f32);

unsafe impl Send for SharedConst {}
unsafe impl Sync for SharedConst {}

impl SharedConst {
    unsafe fn read(&self, index: usize) -> f32 {
        *self.0.add(index)
    }
}

/// substep_g2p(x, v, C, J, grid_v)
unsafe extern "C-unwind" fn substep_g2p(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    let x = SharedMut(ctx.array_slice_mut::<f32>(0).as_mut_ptr());
    let v = SharedMut(ctx.array_slice_mut::<f32>(1).as_mut_ptr());
    let c = SharedMut(ctx.array_slice_mut::<f32>(2).as_mut_ptr());
    let j_slice = ctx.array_slice_mut::<f32>(3);
    let n = j_slice.len();
    let j = SharedMut(j_slice.as_mut_ptr());
    let grid_v = ctx.array_slice::<f32>(4);
    let xr = SharedConst(x.0);
    let jr = SharedConst(j.0);

    parallel_for(n, move |p| {
        let px = xr.read(2 * p);
        let py = xr.read(2 * p + 1);
        let stencil = Stencil::new(px, py);
        let mut new_v = [0.0f32; 2];
        let mut new_c = [0.0f32; 4];
        for (cell, weight, dpos) in stencil.neighbours() {
            let g = [grid_v[2 * cell], grid_v[2 * cell + 1]];
            new_v[0] += weight * g[0];
            new_v[1] += weight * g[1];
            let k = 4.0 * weight * INV_DX * INV_DX;
            new_c[0] += k * g[0] * dpos[0];
            new_c[1] += k * g[0] * dpos[1];
            new_c[2] += k * g[1] * dpos[0];
            new_c[3] += k * g[1] * dpos[1];
        }
        v.write(2 * p, new_v[0]);
        v.write(2 * p + 1, new_v[1]);
        x.write(2 * p, px + DT * new_v[0]);
        x.write(2 * p + 1, py + DT * new_v[1]);
        j.write(p, jr.read(p) * (1.0 + DT * (new_c[0] + new_c[3])));
        for (k, value) in new_c.iter().enumerate() {
            c.write(4 * p + k, *value);
        }
    });
}

/// fill_pos(x: [N]x[2], pos: [N]x[3])
unsafe extern "C-unwind" fn fill_pos(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    let x = ctx.array_slice::<f32>(0);
    let pos = ctx.array_slice_mut::<f32>(1);
    for (p, out) in pos.chunks_exact_mut(3).enumerate() {
        out[0] = x[2 * p];
        out[1] = x[2 * p + 1];
        out[2] = 0.0;
    }
}

pub fn host_symbols() -> HostSymbolTable {
    HostSymbolTable::new()
        .with("init_particles_c0", init_particles)
        .with("substep_reset_grid_c0", substep_reset_grid)
        .with("substep_p2g_c0", substep_p2g)
        .with("substep_update_grid_v_c0", substep_update_grid_v)
        .with("substep_g2p_c0", substep_g2p)
        .with("fill_pos_c0", fill_pos)
}

/// Artifact description of the MPM88 module
pub fn module() -> ArtifactBuilder {
    use PrimitiveType::F32;
    let grid = [N_GRID, N_GRID];
    let x = || ndarray("x", F32, 1, &[2]);
    let v = || ndarray("v", F32, 1, &[2]);
    let c = || ndarray("C", F32, 1, &[2, 2]);
    let j = || ndarray("J", F32, 1, &[]);
    let grid_v = || pinned_ndarray("grid_v", F32, &grid, &[2]);
    let grid_m = || pinned_ndarray("grid_m", F32, &grid, &[]);

    let mut update = Vec::with_capacity(SUBSTEPS * 4 + 1);
    for _ in 0..SUBSTEPS {
        update.push(dispatch_same("substep_reset_grid", &["grid_v", "grid_m"]));
        update.push(dispatch_same("substep_p2g", &["x", "v", "C", "J", "grid_v", "grid_m"]));
        update.push(dispatch_same("substep_update_grid_v", &["grid_v", "grid_m"]));
        update.push(dispatch_same("substep_g2p", &["x", "v", "C", "J", "grid_v"]));
    }
    update.push(dispatch_same("fill_pos", &["x", "pos"]));

    ArtifactBuilder::cpu()
        .kernel("init_particles", vec![x(), v(), j()], &["init_particles_c0"])
        .kernel("substep_reset_grid", vec![grid_v(), grid_m()], &["substep_reset_grid_c0"])
        .kernel(
            "substep_p2g",
            vec![x(), v(), c(), j(), grid_v(), grid_m()],
            &["substep_p2g_c0"],
        )
        .kernel("substep_update_grid_v", vec![grid_v(), grid_m()], &["substep_update_grid_v_c0"])
        .kernel("substep_g2p", vec![x(), v(), c(), j(), grid_v()], &["substep_g2p_c0"])
        .kernel("fill_pos", vec![x(), ndarray("pos", F32, 1, &[3])], &["fill_pos_c0"])
        .graph("init", vec![dispatch_same("init_particles", &["x", "v", "J"])])
        .graph("update", update)
}

/// Device arrays of one simulation, allocated the way an application would
pub struct Mpm88State {
    pub x: Ndarray,
    pub v: Ndarray,
    pub j: Ndarray,
    pub grid_v: Ndarray,
    pub grid_m: Ndarray,
    pub pos: Ndarray,
    pub c: Ndarray,
}

fn f32_array(
    runtime: &RuntimeExecutor,
    shape: &[usize],
    element_shape: &[usize],
) -> anyhow::Result<Ndarray> {
    let elems: usize = shape.iter().chain(element_shape).product();
    let alloc = runtime.allocate_memory_ndarray(elems * std::mem::size_of::<f32>())?;
    Ok(Ndarray::with_element_shape(
        alloc,
        PrimitiveType::F32,
        shape.to_vec(),
        element_shape.to_vec(),
    ))
}

impl Mpm88State {
    pub fn allocate(runtime: &RuntimeExecutor) -> anyhow::Result<Self> {
        Ok(Mpm88State {
            x: f32_array(runtime, &[NR_PARTICLES], &[2])?,
            v: f32_array(runtime, &[NR_PARTICLES], &[2])?,
            j: f32_array(runtime, &[NR_PARTICLES], &[])?,
            grid_v: f32_array(runtime, &[N_GRID, N_GRID], &[2])?,
            grid_m: f32_array(runtime, &[N_GRID, N_GRID], &[])?,
            pos: f32_array(runtime, &[NR_PARTICLES], &[3])?,
            c: f32_array(runtime, &[NR_PARTICLES], &[2, 2])?,
        })
    }

    /// Arguments of graph `init`
    pub fn init_args(&self) -> ArgMap<'_> {
        let mut args = ArgMap::new();
        args.insert("x".to_string(), IValue::create(&self.x));
        args.insert("v".to_string(), IValue::create(&self.v));
        args.insert("J".to_string(), IValue::create(&self.j));
        args
    }

    /// Arguments of graph `update` (a superset of `init`'s)
    pub fn update_args(&self) -> ArgMap<'_> {
        let mut args = self.init_args();
        args.insert("C".to_string(), IValue::create(&self.c));
        args.insert("grid_v".to_string(), IValue::create(&self.grid_v));
        args.insert("grid_m".to_string(), IValue::create(&self.grid_m));
        args.insert("pos".to_string(), IValue::create(&self.pos));
        args
    }
}
