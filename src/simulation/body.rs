use nalgebra::{Rotation3, Unit};

use crate::{floating_type_mod::FT, M3, V3};

/// A rigid body: pose and velocity are pure functions of time, so bodies can
/// be shared immutably between collections while a step is running.
pub struct Body {
    name: String,
    pos0: V3,
    vel: V3,
    rot_axis: V3,
    rot_rate: FT,
}

impl Body {
    pub fn new(name: impl Into<String>) -> Body {
        Body {
            name: name.into(),
            pos0: V3::zeros(),
            vel: V3::zeros(),
            rot_axis: V3::z(),
            rot_rate: 0.0,
        }
    }

    pub fn with_motion(name: impl Into<String>, pos0: V3, vel: V3, rot_axis: V3, rot_rate: FT) -> Body {
        let name = name.into();
        assert!(
            rot_rate == 0.0 || rot_axis.norm_squared() > 0.0,
            "rotating body ({}) has a degenerate rotation axis",
            name
        );
        Body {
            name,
            pos0,
            vel,
            rot_axis,
            rot_rate,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pos(&self, time: f64) -> V3 {
        self.pos0 + self.vel * time as FT
    }

    pub fn vel(&self, _time: f64) -> V3 {
        self.vel
    }

    pub fn rot_vel(&self) -> V3 {
        if self.rot_rate == 0.0 {
            V3::zeros()
        } else {
            self.rot_axis.normalize() * self.rot_rate
        }
    }

    pub fn orientation(&self, time: f64) -> M3 {
        if self.rot_rate == 0.0 {
            M3::identity()
        } else {
            let axis = Unit::new_normalize(self.rot_axis);
            *Rotation3::from_axis_angle(&axis, self.rot_rate * time as FT).matrix()
        }
    }

    /// World-frame position of a body-frame point at the given time.
    pub fn to_world(&self, xb: V3, time: f64) -> V3 {
        self.pos(time) + self.orientation(time) * xb
    }

    /// Velocity of the material point currently at world position `x`.
    pub fn point_vel(&self, x: V3, time: f64) -> V3 {
        self.vel + self.rot_vel().cross(&(x - self.pos(time)))
    }

    /// Move a world-frame point rigidly from `time` to `time + dt`.
    pub fn displace(&self, x: V3, time: f64, dt: f64) -> V3 {
        let xb = self.orientation(time).transpose() * (x - self.pos(time));
        self.to_world(xb, time + dt)
    }

    pub fn moves(&self) -> bool {
        self.vel.norm_squared() > 0.0 || self.rot_rate != 0.0
    }
}

#[test]
fn rigid_displacement_round_trip_test() {
    use crate::vec3f;

    let body = Body {
        name: "rotor".into(),
        pos0: vec3f(1.0, 0.0, 0.0),
        vel: vec3f(0.0, 0.5, 0.0),
        rot_axis: vec3f(0.0, 0.0, 1.0),
        rot_rate: 2.0,
    };

    let x = vec3f(1.5, 0.2, 0.1);
    // displacing forward then backward must return to the start
    let fwd = body.displace(x, 0.3, 0.1);
    let back = body.displace(fwd, 0.4, -0.1);
    assert!((back - x).norm() < 1e-5);

    // a point on the rotation axis only translates
    let on_axis = body.pos(0.0);
    let moved = body.displace(on_axis, 0.0, 0.25);
    assert!((moved - body.pos(0.25)).norm() < 1e-6);
}
