//! Minimal particle emitter feeding the viewport.

use glam::{Vec2, Vec4};

/// Emitter parameters, in render units and seconds.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    pub origin: Vec2,
    pub rate: f32,
    pub lifetime: f32,
    pub speed: f32,
    /// Half-angle of the emission cone around +Y, radians.
    pub spread: f32,
    pub gravity: Vec2,
    pub start_scale: f32,
    pub end_scale: f32,
    pub start_color: Vec4,
    pub end_color: Vec4,
    pub max_particles: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            origin: Vec2::new(0.0, -300.0),
            rate: 400.0,
            lifetime: 2.0,
            speed: 350.0,
            spread: 0.35,
            gravity: Vec2::new(0.0, -120.0),
            start_scale: 18.0,
            end_scale: 4.0,
            start_color: Vec4::new(1.0, 0.75, 0.2, 1.0),
            end_color: Vec4::new(0.8, 0.1, 0.05, 0.0),
            max_particles: 4000,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Particle {
    position: Vec2,
    velocity: Vec2,
    age: f32,
    rotation: f32,
    spin: f32,
}

/// CPU simulation. Output is laid out as the parallel arrays `draw_quads` takes.
pub struct Emitter {
    config: EmitterConfig,
    particles: Vec<Particle>,
    pending: f32,
    rng: XorShift,

    positions: Vec<Vec2>,
    colors: Vec<Vec4>,
    scales: Vec<f32>,
}

impl Emitter {
    pub fn new(config: EmitterConfig) -> Self {
        Self {
            particles: Vec::with_capacity(config.max_particles),
            config,
            pending: 0.0,
            rng: XorShift::new(0x9e37_79b9),
            positions: Vec::new(),
            colors: Vec::new(),
            scales: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Advances the simulation by `dt` seconds and refreshes the draw arrays.
    pub fn update(&mut self, dt: f32) {
        let lifetime = self.config.lifetime;
        let gravity = self.config.gravity;

        for p in &mut self.particles {
            p.age += dt;
            p.velocity += gravity * dt;
            p.position += p.velocity * dt;
            p.rotation += p.spin * dt;
        }
        self.particles.retain(|p| p.age < lifetime);

        self.pending += self.config.rate * dt;
        while self.pending >= 1.0 {
            self.pending -= 1.0;
            if self.particles.len() >= self.config.max_particles {
                continue;
            }
            let particle = self.spawn();
            self.particles.push(particle);
        }

        self.rebuild();
    }

    fn spawn(&mut self) -> Particle {
        let angle = std::f32::consts::FRAC_PI_2 + self.rng.signed() * self.config.spread;
        let speed = self.config.speed * (0.6 + 0.4 * self.rng.unit());
        Particle {
            position: self.config.origin,
            velocity: Vec2::from_angle(angle) * speed,
            age: 0.0,
            rotation: self.rng.unit() * std::f32::consts::TAU,
            spin: self.rng.signed() * 3.0,
        }
    }

    fn rebuild(&mut self) {
        let c = &self.config;
        self.positions.clear();
        self.colors.clear();
        self.scales.clear();
        for p in &self.particles {
            let t = (p.age / c.lifetime).clamp(0.0, 1.0);
            let scale = c.start_scale + (c.end_scale - c.start_scale) * t;
            // quads are anchored at their bottom-left corner
            self.positions.push(p.position - Vec2::splat(scale * 0.5));
            self.colors.push(c.start_color.lerp(c.end_color, t));
            self.scales.push(scale);
        }
    }

    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    pub fn colors(&self) -> &[Vec4] {
        &self.colors
    }

    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    /// Center and rotation of the oldest particles, for the rotated sprite path.
    pub fn oldest(&self, n: usize) -> impl Iterator<Item = (Vec2, f32)> + '_ {
        self.particles.iter().take(n).map(|p| (p.position, p.rotation))
    }
}

/// xorshift32. Deterministic and good enough for visual jitter.
struct XorShift(u32);

impl XorShift {
    fn new(seed: u32) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    /// `[0, 1)`
    fn unit(&mut self) -> f32 {
        (self.next() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// `[-1, 1)`
    fn signed(&mut self) -> f32 {
        self.unit() * 2.0 - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_at_the_configured_rate() {
        let mut e = Emitter::new(EmitterConfig { rate: 100.0, ..Default::default() });
        e.update(0.5);
        assert_eq!(e.len(), 50);
        assert_eq!(e.positions().len(), 50);
        assert_eq!(e.colors().len(), 50);
        assert_eq!(e.scales().len(), 50);
    }

    #[test]
    fn particles_expire_after_their_lifetime() {
        let mut e = Emitter::new(EmitterConfig { rate: 10.0, lifetime: 1.0, ..Default::default() });
        e.update(1.0);
        assert_eq!(e.len(), 10);
        e.config.rate = 0.0;
        e.update(1.1);
        assert!(e.is_empty());
    }

    #[test]
    fn population_is_capped() {
        let mut e = Emitter::new(EmitterConfig { rate: 1000.0, max_particles: 64, ..Default::default() });
        e.update(1.0);
        assert_eq!(e.len(), 64);
    }

    #[test]
    fn colors_fade_towards_the_end_color() {
        let config = EmitterConfig { rate: 1.0, lifetime: 10.0, gravity: Vec2::ZERO, ..Default::default() };
        let mut e = Emitter::new(config.clone());
        e.update(1.0);
        let first = e.colors()[0];
        e.config.rate = 0.0;
        e.update(5.0);
        let later = e.colors()[0];
        assert!(later.w < first.w);
        assert!(e.scales()[0] < config.start_scale);
    }

    #[test]
    fn rng_stays_in_range() {
        let mut rng = XorShift::new(7);
        for _ in 0..10_000 {
            let u = rng.unit();
            assert!((0.0..1.0).contains(&u));
            let s = rng.signed();
            assert!((-1.0..1.0).contains(&s));
        }
    }
}
