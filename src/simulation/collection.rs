use std::sync::Arc;

use crate::{body::Body, floating_type_mod::FT, points::Points, surfaces::Surfaces, V3};

/// Whether a collection holds free vorticity, carries unknown strengths to be
/// solved for, or is passive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Active,
    Reactive,
    Inert,
}

/// How a collection moves: advected by the flow, rigidly attached to a Body,
/// or stationary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Lagrangian,
    BodyBound,
    Fixed,
}

/// The tagged sum over element shapes. Dispatch is an exhaustive match, not
/// virtual calls.
pub enum Collection {
    Points(Points),
    Surfaces(Surfaces),
}

impl Collection {
    pub fn n(&self) -> usize {
        match self {
            Collection::Points(p) => p.n(),
            Collection::Surfaces(s) => s.n_nodes(),
        }
    }

    pub fn n_panels(&self) -> usize {
        match self {
            Collection::Points(_) => 0,
            Collection::Surfaces(s) => s.n_panels(),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Collection::Points(p) => p.kind(),
            Collection::Surfaces(s) => s.kind(),
        }
    }

    pub fn motion(&self) -> Motion {
        match self {
            Collection::Points(p) => p.motion(),
            Collection::Surfaces(s) => s.motion(),
        }
    }

    pub fn body(&self) -> Option<&Arc<Body>> {
        match self {
            Collection::Points(p) => p.body(),
            Collection::Surfaces(s) => s.body(),
        }
    }

    pub fn is_inert(&self) -> bool {
        self.kind() == ElementKind::Inert
    }

    pub fn total_circulation(&self, _time: f64) -> V3 {
        match self {
            Collection::Points(p) => p.total_circulation(),
            Collection::Surfaces(s) => s.total_circulation(),
        }
    }

    /// Circulation carried implicitly by rigid body rotation; zero for point
    /// collections.
    pub fn body_circulation(&self, time: f64) -> V3 {
        match self {
            Collection::Points(_) => V3::zeros(),
            Collection::Surfaces(s) => s.body_circulation(time),
        }
    }

    pub fn total_impulse(&self) -> V3 {
        match self {
            Collection::Points(p) => p.total_impulse(),
            Collection::Surfaces(s) => s.total_impulse(),
        }
    }

    pub fn max_elong(&self) -> FT {
        match self {
            Collection::Points(p) => p.max_elong(),
            Collection::Surfaces(_) => 0.,
        }
    }

    pub fn max_bc_value(&self) -> FT {
        match self {
            Collection::Points(_) => 0.,
            Collection::Surfaces(s) => s.max_bc_value(),
        }
    }

    pub fn update_max_str(&mut self) {
        match self {
            Collection::Points(p) => p.update_max_str(),
            Collection::Surfaces(_) => {}
        }
    }

    pub fn as_points(&self) -> Option<&Points> {
        match self {
            Collection::Points(p) => Some(p),
            Collection::Surfaces(_) => None,
        }
    }

    pub fn as_points_mut(&mut self) -> Option<&mut Points> {
        match self {
            Collection::Points(p) => Some(p),
            Collection::Surfaces(_) => None,
        }
    }

    pub fn as_surfaces(&self) -> Option<&Surfaces> {
        match self {
            Collection::Points(_) => None,
            Collection::Surfaces(s) => Some(s),
        }
    }

    pub fn as_surfaces_mut(&mut self) -> Option<&mut Surfaces> {
        match self {
            Collection::Points(_) => None,
            Collection::Surfaces(s) => Some(s),
        }
    }
}

/// Flat geometry passed from boundary features to the simulation.
#[derive(Debug, Clone, Default)]
pub struct ElementPacket {
    pub x: Vec<FT>,
    pub idx: Vec<u32>,
    pub val: Vec<FT>,
}
