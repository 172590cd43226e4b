//! Plotting of planner runs with gnuplot
//!
//! Layers are collected first and drawn into a single set of axes when the
//! figure is rendered, so the same [`Visualizer`] can be saved repeatedly.

use std::f64::consts::TAU;

use gnuplot::{AutoOption, AxesCommon, Caption, Color, Figure, LineWidth, PointSize, PointSymbol};
use nalgebra::Vector2;

use crate::common::{Obstacle, RobotKinematicState};
use crate::geometry::OrientedRectangle;

/// Color palette for consistent styling
pub mod colors {
    pub const BLACK: &str = "#000000";
    pub const RED: &str = "#FF0000";
    pub const BLUE: &str = "#0000FF";
    pub const ORANGE: &str = "#FFA500";
    pub const GRAY: &str = "#808080";

    pub const OBSTACLE: &str = BLACK;
    pub const GOAL: &str = BLUE;
    pub const ENVELOPE: &str = GRAY;
    pub const VELOCITY: &str = ORANGE;
    pub const FALLBACK: &str = RED;

    /// One color per robot, cycled by robot index
    pub const ROBOTS: [&str; 6] = ["#1F77B4", "#2CA02C", "#9467BD", "#8C564B", "#E377C2", "#17BECF"];
}

/// Style for line layers
#[derive(Debug, Clone)]
pub struct PathStyle {
    pub color: String,
    pub line_width: f64,
    pub caption: String,
}

impl PathStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self {
            color: color.to_string(),
            line_width: 2.0,
            caption: caption.to_string(),
        }
    }

    pub fn with_line_width(mut self, width: f64) -> Self {
        self.line_width = width;
        self
    }
}

/// Style for point layers
#[derive(Debug, Clone)]
pub struct PointStyle {
    pub color: String,
    pub size: f64,
    pub symbol: char,
    pub caption: String,
}

impl PointStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self {
            color: color.to_string(),
            size: 1.0,
            symbol: 'O',
            caption: caption.to_string(),
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_symbol(mut self, symbol: char) -> Self {
        self.symbol = symbol;
        self
    }
}

#[derive(Debug, Clone)]
enum Layer {
    Lines { x: Vec<f64>, y: Vec<f64>, style: PathStyle },
    Points { x: Vec<f64>, y: Vec<f64>, style: PointStyle },
}

pub struct Visualizer {
    layers: Vec<Layer>,
    title: String,
    x_range: Option<(f64, f64)>,
    y_range: Option<(f64, f64)>,
    /// Segments used to approximate circles
    circle_segments: usize,
}

impl Visualizer {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            title: String::new(),
            x_range: None,
            y_range: None,
            circle_segments: 24,
        }
    }

    pub fn set_title(&mut self, title: &str) -> &mut Self {
        self.title = title.to_string();
        self
    }

    pub fn set_x_range(&mut self, min: f64, max: f64) -> &mut Self {
        self.x_range = Some((min, max));
        self
    }

    pub fn set_y_range(&mut self, min: f64, max: f64) -> &mut Self {
        self.y_range = Some((min, max));
        self
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Polyline through `points`
    pub fn plot_trajectory(&mut self, points: &[Vector2<f64>], style: &PathStyle) -> &mut Self {
        let (x, y) = split_xy(points);
        self.layers.push(Layer::Lines {
            x,
            y,
            style: style.clone(),
        });
        self
    }

    pub fn plot_points(&mut self, points: &[Vector2<f64>], style: &PointStyle) -> &mut Self {
        let (x, y) = split_xy(points);
        self.layers.push(Layer::Points {
            x,
            y,
            style: style.clone(),
        });
        self
    }

    pub fn plot_goal(&mut self, goal: Vector2<f64>) -> &mut Self {
        self.plot_points(&[goal], &PointStyle::new(colors::GOAL, "Goal").with_symbol('x').with_size(1.5))
    }

    /// Obstacles as circles of their radius
    pub fn plot_obstacles(&mut self, obstacles: &[Obstacle]) -> &mut Self {
        for (i, obstacle) in obstacles.iter().enumerate() {
            let caption = if i == 0 { "Obstacles" } else { "" };
            let outline = self.circle(obstacle.position, obstacle.radius);
            self.plot_trajectory(&outline, &PathStyle::new(colors::OBSTACLE, caption).with_line_width(1.0));
        }
        self
    }

    /// Closed outline of a safety envelope
    pub fn plot_envelope(&mut self, envelope: &OrientedRectangle, caption: &str) -> &mut Self {
        let corners = envelope.corners();
        let mut outline = corners.to_vec();
        outline.push(corners[0]);
        self.plot_trajectory(&outline, &PathStyle::new(colors::ENVELOPE, caption).with_line_width(1.0))
    }

    /// Robot body with a velocity stub scaled by `arrow_time` seconds
    pub fn plot_robot(&mut self, state: &RobotKinematicState, radius: f64, arrow_time: f64) -> &mut Self {
        let color = colors::ROBOTS[state.id.index() % colors::ROBOTS.len()];
        let outline = self.circle(state.position, radius);
        self.plot_trajectory(&outline, &PathStyle::new(color, &state.id.to_string()).with_line_width(1.5));
        let tip = state.position + state.velocity * arrow_time;
        self.plot_trajectory(&[state.position, tip], &PathStyle::new(colors::VELOCITY, ""))
    }

    pub fn show(&mut self) -> Result<(), String> {
        let mut figure = self.render();
        figure.show().map_err(|e| e.to_string()).map(|_| ())
    }

    pub fn save_png(&mut self, path: &str, width: u32, height: u32) -> Result<(), String> {
        let mut figure = self.render();
        figure.save_to_png(path, width, height).map_err(|e| e.to_string())
    }

    pub fn save_svg(&mut self, path: &str) -> Result<(), String> {
        let mut figure = self.render();
        figure.save_to_svg(path, 800, 600).map_err(|e| e.to_string())
    }

    fn circle(&self, center: Vector2<f64>, radius: f64) -> Vec<Vector2<f64>> {
        (0..=self.circle_segments)
            .map(|i| {
                let angle = TAU * i as f64 / self.circle_segments as f64;
                center + Vector2::new(angle.cos(), angle.sin()) * radius
            })
            .collect()
    }

    fn render(&self) -> Figure {
        let mut figure = Figure::new();
        let axes = figure.axes2d();
        for layer in &self.layers {
            match layer {
                Layer::Lines { x, y, style } => {
                    axes.lines(
                        x,
                        y,
                        &[
                            Caption(style.caption.as_str()),
                            Color(style.color.as_str()),
                            LineWidth(style.line_width),
                        ],
                    );
                }
                Layer::Points { x, y, style } => {
                    axes.points(
                        x,
                        y,
                        &[
                            Caption(style.caption.as_str()),
                            Color(style.color.as_str()),
                            PointSymbol(style.symbol),
                            PointSize(style.size),
                        ],
                    );
                }
            }
        }

        if !self.title.is_empty() {
            axes.set_title(&self.title, &[]);
        }
        axes.set_x_label("X [m]", &[]);
        axes.set_y_label("Y [m]", &[]);
        if let Some((min, max)) = self.x_range {
            axes.set_x_range(AutoOption::Fix(min), AutoOption::Fix(max));
        }
        if let Some((min, max)) = self.y_range {
            axes.set_y_range(AutoOption::Fix(min), AutoOption::Fix(max));
        }
        axes.set_aspect_ratio(AutoOption::Fix(1.0));
        figure
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}

fn split_xy(points: &[Vector2<f64>]) -> (Vec<f64>, Vec<f64>) {
    points.iter().map(|p| (p.x, p.y)).unzip()
}
