#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
#[allow(non_snake_case)]
pub struct Vertex {
    a_Pos: [f32; 3],
}

const fn v(x: f32, y: f32, z: f32) -> Vertex {
    Vertex { a_Pos: [x, y, z] }
}

pub const FIRST_TRIANGLE: [Vertex; 3] = [
    v(-0.9, -0.5, 0.0), // left
    v(-0.0, -0.5, 0.0), // right
    v(-0.45, 0.5, 0.0), // top
];

// upside down
pub const SECOND_TRIANGLE: [Vertex; 3] = [
    v(0.0, 0.5, 0.0), // left
    v(0.9, 0.5, 0.0), // right
    v(0.45, -0.5, 0.0), // bottom
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn vertex_is_three_packed_floats() {
        assert_eq!(mem::size_of::<Vertex>(), 12);
    }

    #[test]
    fn triangles_sit_on_either_side_of_the_origin() {
        assert!(FIRST_TRIANGLE.iter().all(|v| v.a_Pos[0] <= 0.0));
        assert!(SECOND_TRIANGLE.iter().all(|v| v.a_Pos[0] >= 0.0));
    }

    #[test]
    fn second_triangle_points_down() {
        let apex = SECOND_TRIANGLE[2].a_Pos[1];
        assert!(SECOND_TRIANGLE[..2].iter().all(|v| v.a_Pos[1] > apex));
    }

    #[test]
    fn vertices_lie_in_clip_space() {
        for v in FIRST_TRIANGLE.iter().chain(SECOND_TRIANGLE.iter()) {
            assert!(v.a_Pos.iter().all(|c| (-1.0..=1.0).contains(c)));
        }
    }
}
